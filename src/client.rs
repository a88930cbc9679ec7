//! Typed HTTP client for the media API.
//!
//! Every authenticated call takes the caller's [`Credential`] explicitly;
//! the client itself holds no identity.

use crate::{
    models::{
        media::{Deleted, Media, MediaPage, PublishState},
        response::{ApiResponse, ErrorBody},
    },
    scheduler::MediaDeleter,
    services::assets::content_type_for,
};
use async_trait::async_trait;
use reqwest::{
    Client, RequestBuilder, Response,
    multipart::{Form, Part},
};
use serde::de::DeserializeOwned;
use std::{fmt, io, path::Path};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ClientError {
    /// HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Bearer token of one caller.
#[derive(Clone)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// One file of a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadPart {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read a local file; the content type is guessed from its extension.
    pub async fn from_path(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into());
        let content_type = content_type_for(&file_name);
        Ok(Self::new(file_name, content_type, bytes))
    }

    fn into_part(self) -> ClientResult<Part> {
        Ok(Part::bytes(self.bytes)
            .file_name(self.file_name)
            .mime_str(&self.content_type)?)
    }
}

#[derive(Debug, Clone)]
pub struct NewUpload {
    pub title: String,
    pub description: String,
    pub video: UploadPart,
    pub thumbnail: UploadPart,
    pub is_published: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct MediaUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<UploadPart>,
}

/// Query string of `GET /api/v1/videos`; unset fields use server defaults.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub owner_id: Option<String>,
    pub query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListParams {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let text = [
            ("userId", &self.owner_id),
            ("query", &self.query),
            ("sortBy", &self.sort_by),
            ("sortType", &self.sort_type),
        ];
        let numbers = [("page", self.page), ("limit", self.limit)];
        text.into_iter()
            .filter_map(|(key, value)| value.clone().map(|v| (key, v)))
            .chain(
                numbers
                    .into_iter()
                    .filter_map(|(key, value)| value.map(|v| (key, v.to_string()))),
            )
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct MediaClient {
    http: Client,
    base_url: String,
}

impl MediaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/videos{}", self.base_url, path)
    }

    pub async fn create_media(&self, credential: &Credential, upload: NewUpload) -> ClientResult<Media> {
        let mut form = Form::new()
            .text("title", upload.title)
            .text("description", upload.description)
            .part("videoFile", upload.video.into_part()?)
            .part("thumbnail", upload.thumbnail.into_part()?);
        if let Some(flag) = upload.is_published {
            form = form.text("isPublished", flag.to_string());
        }
        let request = self.http.post(self.url("")).multipart(form);
        send(authorize(request, Some(credential))).await
    }

    pub async fn list_media(
        &self,
        credential: Option<&Credential>,
        params: &ListParams,
    ) -> ClientResult<MediaPage> {
        let request = self.http.get(self.url("")).query(&params.pairs());
        send(authorize(request, credential)).await
    }

    pub async fn get_media(&self, credential: Option<&Credential>, id: Uuid) -> ClientResult<Media> {
        let request = self.http.get(self.url(&format!("/{id}")));
        send(authorize(request, credential)).await
    }

    pub async fn update_media(
        &self,
        credential: &Credential,
        id: Uuid,
        update: MediaUpdate,
    ) -> ClientResult<Media> {
        let mut form = Form::new();
        if let Some(title) = update.title {
            form = form.text("title", title);
        }
        if let Some(description) = update.description {
            form = form.text("description", description);
        }
        if let Some(thumbnail) = update.thumbnail {
            form = form.part("thumbnail", thumbnail.into_part()?);
        }
        let request = self.http.patch(self.url(&format!("/{id}"))).multipart(form);
        send(authorize(request, Some(credential))).await
    }

    pub async fn delete_media(&self, credential: &Credential, id: Uuid) -> ClientResult<Deleted> {
        let request = self.http.delete(self.url(&format!("/{id}")));
        send(authorize(request, Some(credential))).await
    }

    pub async fn toggle_publish(&self, credential: &Credential, id: Uuid) -> ClientResult<PublishState> {
        let request = self.http.patch(self.url(&format!("/toggle/publish/{id}")));
        send(authorize(request, Some(credential))).await
    }
}

fn authorize(request: RequestBuilder, credential: Option<&Credential>) -> RequestBuilder {
    match credential {
        Some(credential) => request.bearer_auth(&credential.token),
        None => request,
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> ClientResult<T> {
    unwrap_envelope(request.send().await?).await
}

async fn unwrap_envelope<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if status.is_success() {
        let envelope: ApiResponse<T> = response.json().await?;
        return Ok(envelope.data);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

/// A client bound to one caller, usable as the scheduler's deleter.
#[derive(Clone, Debug)]
pub struct AuthorizedClient {
    pub client: MediaClient,
    pub credential: Credential,
}

impl AuthorizedClient {
    pub fn new(client: MediaClient, credential: Credential) -> Self {
        Self { client, credential }
    }
}

#[async_trait]
impl MediaDeleter for AuthorizedClient {
    async fn delete_media(&self, id: Uuid) -> anyhow::Result<()> {
        self.client.delete_media(&self.credential, id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_never_print_their_token() {
        let credential = Credential::bearer("super-secret-token");
        assert!(!format!("{credential:?}").contains("super-secret"));
    }

    #[test]
    fn base_url_is_normalized() {
        let client = MediaClient::new("http://localhost:3000/");
        assert_eq!(client.url("/abc"), "http://localhost:3000/api/v1/videos/abc");
    }

    #[tokio::test]
    async fn upload_parts_guess_content_type_from_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poster.JPG");
        tokio::fs::write(&path, b"jpeg").await.unwrap();

        let part = UploadPart::from_path(&path).await.unwrap();
        assert_eq!(part.file_name, "poster.JPG");
        assert_eq!(part.content_type, "image/jpeg");
        assert_eq!(part.bytes, b"jpeg");
    }

    #[test]
    fn list_params_only_send_what_is_set() {
        let params = ListParams {
            owner_id: Some("alice".into()),
            sort_type: Some("asc".into()),
            limit: Some(5),
            ..Default::default()
        };
        assert_eq!(
            params.pairs(),
            vec![
                ("userId", "alice".to_string()),
                ("sortType", "asc".to_string()),
                ("limit", "5".to_string()),
            ]
        );
        assert!(ListParams::default().pairs().is_empty());
    }
}
