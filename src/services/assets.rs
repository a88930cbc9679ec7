//! Asset store: durable storage for uploaded videos and thumbnails.
//!
//! `AssetStore` is the seam the pipeline talks to. `LocalAssetStore` keeps
//! payloads on local disk sharded beneath
//! `base_path/{shard}/{shard}/{kind}/{name}` and publishes them under
//! `{public_url}/{key}`, served by the `/assets` route.

use crate::services::{probe, staging::StagedFile};
use async_trait::async_trait;
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("staged file `{0}` is missing")]
    MissingSource(PathBuf),
    #[error("asset `{0}` not found")]
    NotFound(String),
    #[error("invalid asset key")]
    InvalidKey,
    #[error("url `{0}` does not belong to this asset store")]
    ForeignUrl(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type AssetResult<T> = Result<T, AssetError>;

/// What an asset is used for. Decides the key prefix and whether a
/// duration is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Video,
    Image,
}

impl AssetKind {
    fn prefix(self) -> &'static str {
        match self {
            AssetKind::Video => "videos",
            AssetKind::Image => "thumbnails",
        }
    }

    fn default_extension(self) -> &'static str {
        match self {
            AssetKind::Video => "mp4",
            AssetKind::Image => "jpg",
        }
    }

    /// Whether a declared content type is acceptable for this kind.
    /// Undeclared and generic binary types are let through.
    pub fn accepts(self, content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return true;
        };
        let content_type = content_type.to_ascii_lowercase();
        if content_type.starts_with("application/octet-stream") {
            return true;
        }
        match self {
            AssetKind::Video => content_type.starts_with("video/"),
            AssetKind::Image => content_type.starts_with("image/"),
        }
    }
}

/// Result of a successful store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAsset {
    pub key: String,
    pub url: String,
    pub size_bytes: u64,
    pub etag: String,
    /// Present only for videos whose container declares a duration.
    pub duration_seconds: Option<f64>,
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Durably store a staged file and return its public URL.
    async fn store(&self, file: &StagedFile, kind: AssetKind) -> AssetResult<StoredAsset>;

    /// Delete the asset published at `url`.
    async fn remove(&self, url: &str) -> AssetResult<()>;
}

#[derive(Clone, Debug)]
pub struct LocalAssetStore {
    /// Base directory on disk where asset payloads are stored.
    pub base_path: PathBuf,

    /// URL prefix assets are published under, without trailing slash.
    pub public_url: String,
}

const MAX_ASSET_KEY_LEN: usize = 512;

impl LocalAssetStore {
    pub fn new(base_path: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Reject keys that could escape `base_path`.
    fn ensure_key_safe(&self, key: &str) -> AssetResult<()> {
        if key.is_empty() || key.len() > MAX_ASSET_KEY_LEN {
            return Err(AssetError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(AssetError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(AssetError::InvalidKey);
        }
        Ok(())
    }

    /// Two-level shard from MD5(key), keeps directories small.
    fn asset_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn asset_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::asset_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, key)
    }

    fn key_for_url<'a>(&self, url: &'a str) -> AssetResult<&'a str> {
        url.strip_prefix(self.public_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| AssetError::ForeignUrl(url.to_string()))
    }

    /// Open an asset for streaming. Returns the file, its length and a
    /// content type derived from the key.
    pub async fn open(&self, key: &str) -> AssetResult<(File, u64, &'static str)> {
        self.ensure_key_safe(key)?;
        let path = self.asset_path(key);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AssetError::NotFound(key.to_string())
            } else {
                AssetError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len, content_type_for(key)))
    }

    /// Fails when `base_path` is missing or refuses writes.
    pub async fn check_writable(&self) -> io::Result<()> {
        write_marker(&self.base_path).await
    }

    /// Recursively remove empty directories up to `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Create, fill and remove a uniquely named marker file in `dir`.
pub(crate) async fn write_marker(dir: &Path) -> io::Result<()> {
    let marker = dir.join(format!(".ready-{}", Uuid::new_v4()));
    let mut file = File::create(&marker).await?;
    let written = file.write_all(b"ready").await;
    drop(file);
    fs::remove_file(&marker).await?;
    written
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    /// - Copies the staged file into a temporary file next to its target.
    /// - Computes MD5/etag and size while copying.
    /// - Fsyncs, then atomically renames into place.
    /// - Probes the duration of videos.
    async fn store(&self, staged: &StagedFile, kind: AssetKind) -> AssetResult<StoredAsset> {
        let extension = staged
            .extension()
            .unwrap_or_else(|| kind.default_extension().to_string());
        let key = format!("{}/{}.{}", kind.prefix(), Uuid::new_v4(), extension);
        self.ensure_key_safe(&key)?;

        let mut source = File::open(&staged.path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AssetError::MissingSource(staged.path.clone())
            } else {
                AssetError::Io(err)
            }
        })?;

        let file_path = self.asset_path(&key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            AssetError::Io(io::Error::new(
                ErrorKind::Other,
                "asset path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes = 0u64;
        let mut digest = Context::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = match source.read(&mut buf).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(AssetError::Io(err));
                }
            };
            size_bytes += read as u64;
            digest.consume(&buf[..read]);
            if let Err(err) = file.write_all(&buf[..read]).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(AssetError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(AssetError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(AssetError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(AssetError::Io(err));
        }

        let duration_seconds = match kind {
            AssetKind::Video => match probe::video_duration(&file_path).await {
                Ok(Some(seconds)) => Some(seconds),
                Ok(None) => {
                    warn!(key = %key, "video container declares no duration");
                    None
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "failed to probe video duration");
                    None
                }
            },
            AssetKind::Image => None,
        };

        let etag = format!("{:x}", digest.compute());
        debug!(key = %key, bytes = size_bytes, etag = %etag, "stored asset");

        Ok(StoredAsset {
            url: self.url_for(&key),
            key,
            size_bytes,
            etag,
            duration_seconds,
        })
    }

    /// Delete the payload and prune now-empty shard directories.
    async fn remove(&self, url: &str) -> AssetResult<()> {
        let key = self.key_for_url(url)?;
        self.ensure_key_safe(key)?;
        let file_path = self.asset_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed asset file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(AssetError::NotFound(key.to_string()));
            }
            Err(err) => return Err(AssetError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }
}

/// Content type served for a key, by extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
