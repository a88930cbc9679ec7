//! MediaService: ingestion pipeline and ownership-gated lifecycle.
//!
//! - `publish` turns two staged files into one durable record, or into
//!   nothing at all.
//! - `apply_partial_update` coalesces optional fields into one
//!   version-guarded mutation.
//! - `toggle_publish` and `delete` flip visibility and remove records.
//!
//! Assets already stored when a later step fails are deleted again; if that
//! compensation fails the orphaned URL is logged.

use crate::{
    models::{
        caller::Caller,
        media::{Deleted, Media, MediaChanges, MediaPage, NewMedia, PublishState},
    },
    services::{
        assets::{AssetError, AssetKind, AssetStore, StoredAsset},
        guard::{self, Action},
        records::{MediaFilter, MediaRecordStore, SortKey, SortOrder, StoreError},
        staging::StagedFile,
    },
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0}")]
    Validation(String),
    #[error("authentication required")]
    Unauthenticated,
    #[error("caller does not own this media")]
    Forbidden,
    #[error("media `{0}` not found")]
    NotFound(Uuid),
    #[error("media `{0}` was modified concurrently")]
    Conflict(Uuid),
    #[error("asset upload failed: {0}")]
    Upload(#[source] AssetError),
    #[error("record store failure: {0}")]
    Storage(#[source] StoreError),
}

impl From<StoreError> for MediaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => MediaError::NotFound(id),
            StoreError::VersionConflict { id, .. } => MediaError::Conflict(id),
            other => MediaError::Storage(other),
        }
    }
}

pub type MediaResult<T> = Result<T, MediaError>;

/// Multipart form of a new upload, straight from the staging layer.
#[derive(Debug, Default)]
pub struct PublishInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub video: Option<StagedFile>,
    pub thumbnail: Option<StagedFile>,
    /// Explicit initial visibility, private when absent.
    pub is_published: Option<bool>,
}

/// Fields of an edit. Absent fields keep their stored value.
#[derive(Debug, Default)]
pub struct MediaPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<StagedFile>,
}

impl MediaPatch {
    fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.thumbnail.is_none()
    }
}

fn parse_or_default<T>(raw: Option<&str>) -> MediaResult<T>
where
    T: std::str::FromStr<Err = String> + Default,
{
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => raw.parse().map_err(MediaError::Validation),
        None => Ok(T::default()),
    }
}

#[derive(Debug, Default, Clone)]
pub struct ListQuery {
    pub owner_id: Option<String>,
    /// Substring searched in titles and descriptions.
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Clone)]
pub struct MediaService {
    assets: Arc<dyn AssetStore>,
    records: Arc<dyn MediaRecordStore>,
}

impl MediaService {
    pub fn new(assets: Arc<dyn AssetStore>, records: Arc<dyn MediaRecordStore>) -> Self {
        Self { assets, records }
    }

    /// Ingest a new upload.
    ///
    /// Validation runs before any external call. The video is stored first,
    /// then the thumbnail, then the record is created with the owner taken
    /// from `caller`.
    pub async fn publish(&self, caller: Option<&Caller>, input: PublishInput) -> MediaResult<Media> {
        let caller = guard::require_caller(caller)?;

        let mut missing = Vec::new();
        let title = non_blank(input.title);
        let description = non_blank(input.description);
        if title.is_none() {
            missing.push("title");
        }
        if description.is_none() {
            missing.push("description");
        }
        if input.video.is_none() {
            missing.push("videoFile");
        }
        if input.thumbnail.is_none() {
            missing.push("thumbnail");
        }
        let (Some(title), Some(description), Some(video), Some(thumbnail)) =
            (title, description, input.video, input.thumbnail)
        else {
            return Err(MediaError::Validation(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        };
        ensure_content_type(&video, AssetKind::Video)?;
        ensure_content_type(&thumbnail, AssetKind::Image)?;

        let video_asset = self
            .assets
            .store(&video, AssetKind::Video)
            .await
            .map_err(MediaError::Upload)?;

        let thumbnail_asset = match self.assets.store(&thumbnail, AssetKind::Image).await {
            Ok(asset) => asset,
            Err(err) => {
                self.discard(&video_asset.url, "thumbnail upload failed").await;
                return Err(MediaError::Upload(err));
            }
        };

        let new_media = NewMedia {
            title,
            description,
            asset_url: video_asset.url.clone(),
            thumbnail_url: thumbnail_asset.url.clone(),
            duration_seconds: duration_of(&video_asset),
            owner_id: caller.id.clone(),
            is_published: input.is_published.unwrap_or(false),
        };

        match self.records.create(new_media).await {
            Ok(media) => {
                info!(id = %media.id, owner = %media.owner_id, "media published");
                Ok(media)
            }
            Err(err) => {
                self.discard(&video_asset.url, "record creation failed").await;
                self.discard(&thumbnail_asset.url, "record creation failed")
                    .await;
                Err(err.into())
            }
        }
    }

    /// Fetch one record. Private records of other owners read as missing.
    pub async fn get(&self, caller: Option<&Caller>, id: Uuid) -> MediaResult<Media> {
        let media = self.records.find_by_id(id).await?;
        if !guard::can_view(caller, &media) {
            return Err(MediaError::NotFound(id));
        }
        Ok(media)
    }

    /// Newest first unless `sort_by`/`sort_type` say otherwise. Private
    /// records are listed only when callers ask for their own uploads.
    pub async fn list(&self, caller: Option<&Caller>, query: ListQuery) -> MediaResult<MediaPage> {
        let sort = parse_or_default::<SortKey>(query.sort_by.as_deref())?;
        let order = parse_or_default::<SortOrder>(query.sort_type.as_deref())?;
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let include_private = match (&query.owner_id, caller) {
            (Some(owner), Some(caller)) => *owner == caller.id,
            _ => false,
        };

        let filter = MediaFilter {
            owner_id: query.owner_id,
            include_private,
            search: query
                .search
                .map(|needle| needle.trim().to_string())
                .filter(|needle| !needle.is_empty()),
            sort,
            order,
            page,
            limit,
        };
        let (videos, total) = self.records.list(&filter).await?;
        Ok(MediaPage {
            videos,
            page,
            limit,
            total,
        })
    }

    /// Merge the present fields of `patch` into the record as one mutation.
    ///
    /// A new thumbnail is stored before anything is written; if it fails,
    /// nothing changes. The write is rejected with `Conflict` when someone
    /// else mutated the record after it was read here.
    pub async fn apply_partial_update(
        &self,
        caller: Option<&Caller>,
        id: Uuid,
        patch: MediaPatch,
    ) -> MediaResult<Media> {
        guard::require_caller(caller)?;
        if patch.is_empty() {
            return Err(MediaError::Validation("nothing to update".into()));
        }
        let mut changes = MediaChanges::default();
        if let Some(title) = patch.title {
            changes.title = Some(required_text("title", title)?);
        }
        if let Some(description) = patch.description {
            changes.description = Some(required_text("description", description)?);
        }
        if let Some(thumbnail) = &patch.thumbnail {
            ensure_content_type(thumbnail, AssetKind::Image)?;
        }

        let current = self.records.find_by_id(id).await?;
        guard::authorize(caller, &current, Action::Edit)?;

        let new_thumbnail = match &patch.thumbnail {
            Some(thumbnail) => Some(
                self.assets
                    .store(thumbnail, AssetKind::Image)
                    .await
                    .map_err(MediaError::Upload)?,
            ),
            None => None,
        };
        changes.thumbnail_url = new_thumbnail.as_ref().map(|asset| asset.url.clone());

        match self.records.update(id, current.version, changes).await {
            Ok(updated) => {
                if new_thumbnail.is_some() && updated.thumbnail_url != current.thumbnail_url {
                    self.discard(&current.thumbnail_url, "thumbnail replaced")
                        .await;
                }
                info!(id = %id, version = updated.version, "media updated");
                Ok(updated)
            }
            Err(err) => {
                if let Some(asset) = &new_thumbnail {
                    self.discard(&asset.url, "update rejected").await;
                }
                Err(err.into())
            }
        }
    }

    /// Flip `Private ⇄ Published`.
    pub async fn toggle_publish(&self, caller: Option<&Caller>, id: Uuid) -> MediaResult<PublishState> {
        guard::require_caller(caller)?;
        let current = self.records.find_by_id(id).await?;
        guard::authorize(caller, &current, Action::TogglePublish)?;

        let next = current.visibility().toggled();
        let changes = MediaChanges {
            is_published: Some(next.is_published()),
            ..Default::default()
        };
        let updated = self.records.update(id, current.version, changes).await?;
        info!(id = %id, visibility = ?next, "media visibility changed");
        Ok(PublishState {
            is_published: updated.is_published,
        })
    }

    /// Remove the record, then its assets best-effort.
    pub async fn delete(&self, caller: Option<&Caller>, id: Uuid) -> MediaResult<Deleted> {
        guard::require_caller(caller)?;
        let current = self.records.find_by_id(id).await?;
        guard::authorize(caller, &current, Action::Delete)?;

        self.records.delete(id).await?;
        self.discard(&current.asset_url, "media deleted").await;
        self.discard(&current.thumbnail_url, "media deleted").await;
        info!(id = %id, "media deleted");
        Ok(Deleted { id, deleted: true })
    }

    /// Best-effort removal of an asset no record references any more.
    async fn discard(&self, url: &str, reason: &str) {
        if let Err(err) = self.assets.remove(url).await {
            warn!(url = %url, reason, error = %err, "failed to remove asset; left orphaned");
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_text(field: &str, value: String) -> MediaResult<String> {
    non_blank(Some(value)).ok_or_else(|| MediaError::Validation(format!("{field} cannot be empty")))
}

fn ensure_content_type(file: &StagedFile, kind: AssetKind) -> MediaResult<()> {
    if kind.accepts(file.content_type.as_deref()) {
        return Ok(());
    }
    let expected = match kind {
        AssetKind::Video => "a video",
        AssetKind::Image => "an image",
    };
    Err(MediaError::Validation(format!(
        "{} must be {expected}",
        file.field
    )))
}

fn duration_of(asset: &StoredAsset) -> f64 {
    asset.duration_seconds.unwrap_or_else(|| {
        warn!(url = %asset.url, "no duration reported for video, storing 0");
        0.0
    })
}
