//! Media upload and lifecycle service.
//!
//! The HTTP surface lives in `routes` and `handlers`; the pipelines behind it
//! in `services`. `client` and `scheduler` are the consumer side: a typed
//! HTTP client and a deferred deletion scheduler with undo built on it.

pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod state;
