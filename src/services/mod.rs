//! Domain services behind the HTTP handlers.
//!
//! `staging` receives multipart uploads, `assets` and `records` persist
//! files and rows, `media_service` runs the pipelines on top of them and
//! `guard` decides who may do what.

pub mod assets;
pub mod guard;
pub mod media_service;
pub mod probe;
pub mod records;
pub mod staging;
