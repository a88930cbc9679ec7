//! Lifecycle & ownership guard.
//!
//! Every mutating operation passes through [`authorize`] before it reaches
//! the record store. Owners are compared on the canonical identifier the
//! record store normalized on read.

use crate::{
    models::{caller::Caller, media::Media},
    services::media_service::MediaError,
};
use std::fmt;
use tracing::debug;

/// Mutations gated on ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Edit,
    Delete,
    TogglePublish,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::TogglePublish => "toggle-publish",
        };
        f.write_str(name)
    }
}

/// Anonymous callers may not mutate anything.
pub fn require_caller(caller: Option<&Caller>) -> Result<&Caller, MediaError> {
    caller.ok_or(MediaError::Unauthenticated)
}

pub fn authorize(caller: Option<&Caller>, media: &Media, action: Action) -> Result<(), MediaError> {
    let caller = require_caller(caller)?;
    if media.is_owned_by(&caller.id) {
        return Ok(());
    }
    debug!(media = %media.id, caller = %caller.id, %action, "ownership check failed");
    Err(MediaError::Forbidden)
}

/// Published media is visible to everyone, private media only to its owner.
pub fn can_view(caller: Option<&Caller>, media: &Media) -> bool {
    media.is_published || caller.is_some_and(|caller| media.is_owned_by(&caller.id))
}
