//! Media record store: durable metadata in SQLite.
//!
//! The owner column is normalized to a canonical identifier as soon as a row
//! is read, so nothing above this module sees the legacy embedded shape.
//! Every mutation is a compare-and-swap on the `version` column.

use crate::models::media::{Media, MediaChanges, NewMedia, OwnerRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("media `{0}` not found")]
    NotFound(Uuid),
    #[error("media `{id}` changed since version {expected}")]
    VersionConflict { id: Uuid, expected: i64 },
    #[error("stored owner of media `{0}` carries no identifier")]
    CorruptOwner(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Columns a listing can be ordered by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    CreatedAt,
    Title,
    Duration,
}

impl SortKey {
    fn column(self) -> &'static str {
        match self {
            SortKey::CreatedAt => "created_at",
            SortKey::Title => "title COLLATE NOCASE",
            SortKey::Duration => "duration_seconds",
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "createdAt" | "created_at" => Ok(SortKey::CreatedAt),
            "title" => Ok(SortKey::Title),
            "duration" | "durationSeconds" | "duration_seconds" => Ok(SortKey::Duration),
            other => Err(format!(
                "cannot sort by `{other}`; use createdAt, title or duration"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.eq_ignore_ascii_case("asc") {
            Ok(SortOrder::Asc)
        } else if raw.eq_ignore_ascii_case("desc") {
            Ok(SortOrder::Desc)
        } else {
            Err(format!("sortType must be `asc` or `desc`, got `{raw}`"))
        }
    }
}

/// Listing parameters after authorization has been applied.
#[derive(Clone, Debug, Default)]
pub struct MediaFilter {
    pub owner_id: Option<String>,
    /// Include private records. Only meaningful together with `owner_id`.
    pub include_private: bool,
    /// Case-insensitive substring of the title or description.
    pub search: Option<String>,
    pub sort: SortKey,
    pub order: SortOrder,
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
}

impl MediaFilter {
    fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }
}

/// `LIKE` pattern matching `needle` anywhere, with wildcards escaped by `\`.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
pub trait MediaRecordStore: Send + Sync {
    async fn create(&self, media: NewMedia) -> StoreResult<Media>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Media>;

    /// Apply `changes` if the stored version still equals `expected_version`.
    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        changes: MediaChanges,
    ) -> StoreResult<Media>;

    async fn delete(&self, id: Uuid) -> StoreResult<()>;

    /// One page of records plus the total number matching the filter.
    async fn list(&self, filter: &MediaFilter) -> StoreResult<(Vec<Media>, i64)>;
}

const MEDIA_COLUMNS: &str = "id, title, description, asset_url, thumbnail_url, duration_seconds, \
     owner, is_published, created_at, updated_at, version";

#[derive(FromRow, Debug)]
struct MediaRow {
    id: Uuid,
    title: String,
    description: String,
    asset_url: String,
    thumbnail_url: String,
    duration_seconds: f64,
    owner: String,
    is_published: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<MediaRow> for Media {
    type Error = StoreError;

    fn try_from(row: MediaRow) -> StoreResult<Self> {
        let owner_id = OwnerRef::from_stored(&row.owner)
            .into_canonical()
            .ok_or(StoreError::CorruptOwner(row.id))?;
        Ok(Media {
            id: row.id,
            title: row.title,
            description: row.description,
            asset_url: row.asset_url,
            thumbnail_url: row.thumbnail_url,
            duration_seconds: row.duration_seconds,
            owner_id,
            is_published: row.is_published,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

#[derive(Clone)]
pub struct SqliteMediaStore {
    pub db: Arc<SqlitePool>,
}

impl SqliteMediaStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    async fn exists(&self, id: Uuid) -> StoreResult<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM media WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(found.is_some())
    }

    /// Owner matching accepts a bare id and an embedded document, resolved
    /// like [`OwnerRef::canonical`]: a non-empty `_id` shadows `id`.
    fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &MediaFilter) {
        builder.push(" WHERE 1 = 1");
        if let Some(owner) = &filter.owner_id {
            builder.push(" AND (owner = ");
            builder.push_bind(owner.clone());
            builder.push(
                " OR CASE WHEN json_valid(owner) THEN \
                 COALESCE(NULLIF(json_extract(owner, '$._id'), ''), json_extract(owner, '$.id')) \
                 END = ",
            );
            builder.push_bind(owner.clone());
            builder.push(")");
        }
        if let Some(search) = &filter.search {
            let pattern = contains_pattern(search);
            builder.push(" AND (title LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" ESCAPE '\\' OR description LIKE ");
            builder.push_bind(pattern);
            builder.push(" ESCAPE '\\')");
        }
        if !(filter.include_private && filter.owner_id.is_some()) {
            builder.push(" AND is_published = 1");
        }
    }
}

#[async_trait]
impl MediaRecordStore for SqliteMediaStore {
    async fn create(&self, media: NewMedia) -> StoreResult<Media> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, MediaRow>(&format!(
            "INSERT INTO media (
                id, title, description, asset_url, thumbnail_url, duration_seconds,
                owner, is_published, created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            RETURNING {MEDIA_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&media.title)
        .bind(&media.description)
        .bind(&media.asset_url)
        .bind(&media.thumbnail_url)
        .bind(media.duration_seconds)
        .bind(&media.owner_id)
        .bind(media.is_published)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await?;

        debug!(id = %row.id, owner = %media.owner_id, "media record created");
        row.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Media> {
        sqlx::query_as::<_, MediaRow>(&format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = ?"))
            .bind(id)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StoreError::NotFound(id),
                other => StoreError::Sqlx(other),
            })?
            .try_into()
    }

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        changes: MediaChanges,
    ) -> StoreResult<Media> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("UPDATE media SET version = version + 1, updated_at = ");
        builder.push_bind(Utc::now());

        if let Some(title) = changes.title {
            builder.push(", title = ");
            builder.push_bind(title);
        }
        if let Some(description) = changes.description {
            builder.push(", description = ");
            builder.push_bind(description);
        }
        if let Some(thumbnail_url) = changes.thumbnail_url {
            builder.push(", thumbnail_url = ");
            builder.push_bind(thumbnail_url);
        }
        if let Some(is_published) = changes.is_published {
            builder.push(", is_published = ");
            builder.push_bind(is_published);
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(" AND version = ");
        builder.push_bind(expected_version);
        builder.push(" RETURNING ");
        builder.push(MEDIA_COLUMNS);

        let row: Option<MediaRow> = builder.build_query_as().fetch_optional(&*self.db).await?;
        match row {
            Some(row) => row.try_into(),
            None if self.exists(id).await? => Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
            }),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM media WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list(&self, filter: &MediaFilter) -> StoreResult<(Vec<Media>, i64)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM media");
        Self::push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&*self.db).await?;

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
        builder.push(MEDIA_COLUMNS);
        builder.push(" FROM media");
        Self::push_filter(&mut builder, filter);
        let order = filter.order.keyword();
        builder.push(format!(
            " ORDER BY {} {order}, rowid {order} LIMIT ",
            filter.sort.column()
        ));
        builder.push_bind(i64::from(filter.limit));
        builder.push(" OFFSET ");
        builder.push_bind(filter.offset());

        let rows: Vec<MediaRow> = builder.build_query_as().fetch_all(&*self.db).await?;
        let media = rows
            .into_iter()
            .map(Media::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((media, total))
    }
}
