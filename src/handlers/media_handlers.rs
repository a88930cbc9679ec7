//! HTTP handlers for `/api/v1/videos`.
//!
//! Uploads arrive as multipart forms and are staged on disk before the
//! service sees them; staged files are removed once the request is done.

use crate::{
    auth::MaybeCaller,
    errors::AppError,
    models::{
        media::{Deleted, Media, MediaPage, PublishState},
        response::ApiResponse,
    },
    services::{
        guard,
        media_service::{ListQuery, MediaPatch, PublishInput},
        staging::StagedUpload,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

const VIDEO_FIELD: &str = "videoFile";
const THUMBNAIL_FIELD: &str = "thumbnail";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVideosQuery {
    pub user_id: Option<String>,
    pub query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// `POST /api/v1/videos`
pub async fn create_media(
    State(state): State<AppState>,
    caller: MaybeCaller,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<Media>>), AppError> {
    // Reject anonymous uploads before reading the body.
    guard::require_caller(caller.caller())?;

    let upload = state
        .staging
        .receive(&mut multipart, &[VIDEO_FIELD, THUMBNAIL_FIELD])
        .await?;
    let result = publish_staged(&state, &caller, &upload).await;
    upload.cleanup().await;

    let media = result?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(201, media, "Video was published successfully")),
    ))
}

async fn publish_staged(
    state: &AppState,
    caller: &MaybeCaller,
    upload: &StagedUpload,
) -> Result<Media, AppError> {
    let is_published = upload
        .text("isPublished")
        .map(|raw| parse_flag(&raw))
        .transpose()?;
    let input = PublishInput {
        title: upload.text("title"),
        description: upload.text("description"),
        video: upload.stage(VIDEO_FIELD),
        thumbnail: upload.stage(THUMBNAIL_FIELD),
        is_published,
    };
    Ok(state.media.publish(caller.caller(), input).await?)
}

/// `GET /api/v1/videos?userId=&query=&sortBy=&sortType=&page=&limit=`
pub async fn list_media(
    State(state): State<AppState>,
    caller: MaybeCaller,
    Query(q): Query<ListVideosQuery>,
) -> Result<Json<ApiResponse<MediaPage>>, AppError> {
    let query = ListQuery {
        owner_id: q.user_id.filter(|id| !id.trim().is_empty()),
        search: q.query,
        sort_by: q.sort_by,
        sort_type: q.sort_type,
        page: q.page,
        limit: q.limit,
    };
    let page = state.media.list(caller.caller(), query).await?;
    Ok(Json(ApiResponse::new(200, page, "Videos fetched successfully")))
}

/// `GET /api/v1/videos/{id}`
pub async fn get_media(
    State(state): State<AppState>,
    caller: MaybeCaller,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Media>>, AppError> {
    let media = state.media.get(caller.caller(), id).await?;
    Ok(Json(ApiResponse::new(200, media, "Video fetched successfully")))
}

/// `PATCH /api/v1/videos/{id}`: any of `title`, `description`, `thumbnail`.
pub async fn update_media(
    State(state): State<AppState>,
    caller: MaybeCaller,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<Media>>, AppError> {
    guard::require_caller(caller.caller())?;

    let upload = state
        .staging
        .receive(&mut multipart, &[THUMBNAIL_FIELD])
        .await?;
    let patch = MediaPatch {
        title: upload.text("title"),
        description: upload.text("description"),
        thumbnail: upload.stage(THUMBNAIL_FIELD),
    };
    let result = state
        .media
        .apply_partial_update(caller.caller(), id, patch)
        .await;
    upload.cleanup().await;

    let media = result?;
    Ok(Json(ApiResponse::new(200, media, "Video updated successfully")))
}

/// `DELETE /api/v1/videos/{id}`
pub async fn delete_media(
    State(state): State<AppState>,
    caller: MaybeCaller,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Deleted>>, AppError> {
    let deleted = state.media.delete(caller.caller(), id).await?;
    Ok(Json(ApiResponse::new(200, deleted, "Video deleted successfully")))
}

/// `PATCH /api/v1/videos/toggle/publish/{id}`
pub async fn toggle_publish(
    State(state): State<AppState>,
    caller: MaybeCaller,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PublishState>>, AppError> {
    let publish = state.media.toggle_publish(caller.caller(), id).await?;
    let message = if publish.is_published {
        "Video published"
    } else {
        "Video unpublished"
    };
    Ok(Json(ApiResponse::new(200, publish, message)))
}

/// Form checkbox values.
fn parse_flag(raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        other => Err(AppError::bad_request(format!(
            "isPublished must be a boolean, got `{other}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_flag;

    #[test]
    fn form_flags_parse_leniently() {
        assert!(parse_flag("true").unwrap());
        assert!(parse_flag(" On ").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(!parse_flag("").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}
