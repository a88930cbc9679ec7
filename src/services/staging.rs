//! Temporary upload store.
//!
//! Multipart file fields are streamed chunk by chunk into the staging
//! directory, text fields are kept in memory. Handlers pass the staged
//! handles to the pipeline and call [`StagedUpload::cleanup`] once the
//! request is done, whatever its outcome.

use crate::services::assets::write_marker;
use axum::extract::{Multipart, multipart::MultipartError};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::PathBuf,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A file field written to local staging storage.
#[derive(Debug, Clone)]
pub struct StagedFile {
    /// Multipart field name it arrived under.
    pub field: String,
    pub path: PathBuf,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: u64,
}

impl StagedFile {
    /// Lowercased extension of the client-side file name, when it is short
    /// and alphanumeric.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name.as_deref()?;
        let (_, ext) = name.rsplit_once('.')?;
        if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Everything one multipart request carried.
#[derive(Debug, Default)]
pub struct StagedUpload {
    files: HashMap<String, StagedFile>,
    text: HashMap<String, String>,
}

impl StagedUpload {
    /// Handle for a file field, `None` if it was not submitted or empty.
    pub fn stage(&self, field: &str) -> Option<StagedFile> {
        self.files.get(field).cloned()
    }

    pub fn text(&self, field: &str) -> Option<String> {
        self.text.get(field).cloned()
    }

    /// Remove every staged file. Missing files are ignored.
    pub async fn cleanup(self) {
        for file in self.files.into_values() {
            remove_quietly(&file.path).await;
        }
    }
}

/// Writes incoming multipart file fields beneath `dir`.
#[derive(Clone, Debug)]
pub struct UploadStaging {
    pub dir: PathBuf,
}

impl UploadStaging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates the staging directory if needed and proves it takes writes.
    pub async fn check_writable(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        write_marker(&self.dir).await
    }

    /// Drain `multipart`. Fields listed in `file_fields` are staged on disk,
    /// every other field is read as text. On error nothing stays on disk.
    pub async fn receive(
        &self,
        multipart: &mut Multipart,
        file_fields: &[&str],
    ) -> Result<StagedUpload, StagingError> {
        let mut staged = StagedUpload::default();
        match self.drain(multipart, file_fields, &mut staged).await {
            Ok(()) => Ok(staged),
            Err(err) => {
                staged.cleanup().await;
                Err(err)
            }
        }
    }

    async fn drain(
        &self,
        multipart: &mut Multipart,
        file_fields: &[&str],
        staged: &mut StagedUpload,
    ) -> Result<(), StagingError> {
        fs::create_dir_all(&self.dir).await?;

        while let Some(mut field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if !file_fields.contains(&name.as_str()) {
                let value = field.text().await?;
                staged.text.insert(name, value);
                continue;
            }

            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let path = self.dir.join(format!("{}-{}", Uuid::new_v4(), name));

            // A repeated field replaces the earlier one.
            if let Some(previous) = staged.files.remove(&name) {
                remove_quietly(&previous.path).await;
            }

            let mut file = File::create(&path).await?;
            let mut size_bytes = 0u64;
            loop {
                let chunk = match field.chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(err) => {
                        remove_quietly(&path).await;
                        return Err(err.into());
                    }
                };
                size_bytes += chunk.len() as u64;
                if let Err(err) = file.write_all(&chunk).await {
                    remove_quietly(&path).await;
                    return Err(err.into());
                }
            }
            if let Err(err) = file.flush().await {
                remove_quietly(&path).await;
                return Err(err.into());
            }
            drop(file);

            // Browsers send an empty part for an untouched file input.
            if size_bytes == 0 {
                remove_quietly(&path).await;
                debug!(field = %name, "ignoring empty file field");
                continue;
            }

            debug!(field = %name, bytes = size_bytes, path = %path.display(), "staged upload field");
            staged.files.insert(
                name.clone(),
                StagedFile {
                    field: name,
                    path,
                    file_name,
                    content_type,
                    size_bytes,
                },
            );
        }

        Ok(())
    }
}

async fn remove_quietly(path: &std::path::Path) {
    match fs::remove_file(path).await {
        Ok(_) => debug!("removed staged file {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => debug!("failed to remove staged file {}: {}", path.display(), err),
    }
}
