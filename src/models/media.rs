//! Represents a media record (video + thumbnail + metadata) and the value
//! types that flow through its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A single owned piece of content.
///
/// `asset_url`, `duration_seconds`, `owner_id` and `created_at` are fixed at
/// ingestion. Everything else changes through authorized mutations, each of
/// which bumps `version`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    /// Opaque identifier assigned at creation.
    pub id: Uuid,

    pub title: String,

    pub description: String,

    /// Public URL of the primary video asset.
    pub asset_url: String,

    /// Public URL of the preview image.
    pub thumbnail_url: String,

    /// Presentation length read from the video container, `0.0` when unknown.
    pub duration_seconds: f64,

    /// Canonical owner identifier. Accepts the embedded-object shape on input.
    #[serde(alias = "owner", deserialize_with = "deserialize_owner")]
    pub owner_id: String,

    /// Visibility flag, only the owner may flip it.
    pub is_published: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Concurrency token, starts at 1.
    pub version: i64,
}

impl Media {
    pub fn visibility(&self) -> Visibility {
        Visibility::from_flag(self.is_published)
    }

    pub fn is_owned_by(&self, caller_id: &str) -> bool {
        self.owner_id == caller_id
    }
}

/// Persisted visibility states. `Draft` exists only before creation and is
/// never stored.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Published,
}

impl Visibility {
    pub fn from_flag(is_published: bool) -> Self {
        if is_published {
            Visibility::Published
        } else {
            Visibility::Private
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Visibility::Private => Visibility::Published,
            Visibility::Published => Visibility::Private,
        }
    }

    pub fn is_published(self) -> bool {
        matches!(self, Visibility::Published)
    }
}

/// Owner as found in storage or on the wire: either a bare identifier or an
/// embedded user document carrying one.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum OwnerRef {
    Id(String),
    Embedded(EmbeddedOwner),
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct EmbeddedOwner {
    #[serde(rename = "_id", default)]
    pub legacy_id: Option<String>,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub username: Option<String>,
}

impl OwnerRef {
    /// Interpret a stored owner column. JSON objects are decoded, anything
    /// else is taken verbatim as the identifier.
    pub fn from_stored(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            if let Ok(owner) = serde_json::from_str::<OwnerRef>(trimmed) {
                return owner;
            }
        }
        OwnerRef::Id(trimmed.to_string())
    }

    /// The canonical identifier, if the representation carries one. In an
    /// embedded document a non-empty `_id` takes precedence over `id`.
    pub fn canonical(&self) -> Option<&str> {
        let id = match self {
            OwnerRef::Id(id) => Some(id.as_str()),
            OwnerRef::Embedded(owner) => owner
                .legacy_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .or(owner.id.as_deref()),
        };
        id.filter(|id| !id.is_empty())
    }

    pub fn into_canonical(self) -> Option<String> {
        self.canonical().map(str::to_string)
    }
}

fn deserialize_owner<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    OwnerRef::deserialize(deserializer)?
        .into_canonical()
        .ok_or_else(|| serde::de::Error::custom("owner carries no identifier"))
}

/// Fields of a record about to be created. The id, timestamps and version
/// are assigned by the record store.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub title: String,
    pub description: String,
    pub asset_url: String,
    pub thumbnail_url: String,
    pub duration_seconds: f64,
    pub owner_id: String,
    pub is_published: bool,
}

/// A single persisted mutation. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub is_published: Option<bool>,
}

/// One page of a listing.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MediaPage {
    pub videos: Vec<Media>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishState {
    pub is_published: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deleted {
    pub id: Uuid,
    pub deleted: bool,
}
