//! The authenticated identity behind a request.

use serde::{Deserialize, Serialize};

/// Caller identity supplied by the identity provider. Its `id` is the only
/// value ever written to a record's owner.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Caller {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
        }
    }
}
