//! Core data models for the media service.
//!
//! `media` holds the record and its mutation/value types, `caller` the
//! identity requests run as, `response` the JSON envelopes on the wire.

pub mod caller;
pub mod media;
pub mod response;
