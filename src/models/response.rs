//! JSON envelope shared by the HTTP handlers and the client.

use serde::{Deserialize, Serialize};

/// Successful response body: `{ "status", "data", "message" }`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub data: T,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn new(status: u16, data: T, message: impl Into<String>) -> Self {
        Self {
            status,
            data,
            message: message.into(),
        }
    }
}

/// Error response body, as produced by `AppError`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub status: u16,
}
