//! Route table.
//!
//! - **Media endpoints** (`/api/v1/videos`)
//!   - `POST   /api/v1/videos`: multipart upload (`videoFile`, `thumbnail`, `title`, `description`, `isPublished`)
//!   - `GET    /api/v1/videos`: list (`userId`, `query`, `sortBy`, `sortType`, `page`, `limit`)
//!   - `GET    /api/v1/videos/{id}`: fetch one
//!   - `PATCH  /api/v1/videos/{id}`: partial update (`title`, `description`, `thumbnail`)
//!   - `DELETE /api/v1/videos/{id}`: delete record and assets
//!   - `PATCH  /api/v1/videos/toggle/publish/{id}`: flip visibility
//!
//! - **Assets**: `GET /assets/{*key}` streams stored files; keys look like
//!   `videos/{uuid}.mp4`.

use crate::{
    handlers::{
        asset_handlers::get_asset,
        health_handlers::{healthz, readyz},
        media_handlers::{
            create_media, delete_media, get_media, list_media, toggle_publish, update_media,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch},
};
use tower_http::trace::TraceLayer;

pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/v1/videos", get(list_media).post(create_media))
        .route(
            "/api/v1/videos/{id}",
            get(get_media).patch(update_media).delete(delete_media),
        )
        .route("/api/v1/videos/toggle/publish/{id}", patch(toggle_publish))
        .route("/assets/{*key}", get(get_asset))
}

/// The full application: routes, state, upload size limit and request
/// tracing.
pub fn build_app(state: AppState, max_upload_bytes: usize) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::TokenVerifier,
        db::memory_pool,
        services::{
            assets::LocalAssetStore, probe::fixtures::mp4_with_duration, staging::UploadStaging,
        },
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::{sync::Arc, time::Duration};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "media-store-test-boundary";
    const PUBLIC_ORIGIN: &str = "http://media.test";
    const SECRET: &str = "router-test-secret";

    enum Part<'a> {
        Text(&'a str, &'a str),
        File {
            name: &'a str,
            file_name: &'a str,
            content_type: &'a str,
            bytes: &'a [u8],
        },
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                            .as_bytes(),
                    );
                }
                Part::File {
                    name,
                    file_name,
                    content_type,
                    bytes,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                    body.extend_from_slice(b"\r\n");
                }
            }
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    struct Harness {
        app: Router,
        tokens: TokenVerifier,
        staging_dir: std::path::PathBuf,
        _dir: TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let staging_dir = dir.path().join("staging");
            let asset_dir = dir.path().join("assets");
            tokio::fs::create_dir_all(&asset_dir).await.unwrap();
            let state = AppState::new(
                Arc::new(memory_pool().await),
                LocalAssetStore::new(asset_dir, format!("{PUBLIC_ORIGIN}/assets")),
                UploadStaging::new(&staging_dir),
                TokenVerifier::new(SECRET),
            );
            Self {
                app: build_app(state, 1024 * 1024),
                tokens: TokenVerifier::new(SECRET),
                staging_dir,
                _dir: dir,
            }
        }

        fn bearer(&self, subject: &str) -> String {
            let token = self
                .tokens
                .issue(subject, None, Duration::from_secs(300))
                .unwrap();
            format!("Bearer {token}")
        }

        async fn send(&self, request: Request<Body>) -> Response {
            self.app.clone().oneshot(request).await.unwrap()
        }

        async fn upload(&self, auth: Option<&str>, parts: &[Part<'_>]) -> Response {
            let mut builder = Request::builder()
                .method("POST")
                .uri("/api/v1/videos")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                );
            if let Some(auth) = auth {
                builder = builder.header(header::AUTHORIZATION, auth);
            }
            self.send(builder.body(Body::from(multipart_body(parts))).unwrap())
                .await
        }

        async fn get(&self, uri: &str, auth: Option<&str>) -> Response {
            let mut builder = Request::builder().method("GET").uri(uri);
            if let Some(auth) = auth {
                builder = builder.header(header::AUTHORIZATION, auth);
            }
            self.send(builder.body(Body::empty()).unwrap()).await
        }
    }

    async fn json_body(res: Response) -> Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn full_upload(video: &[u8]) -> Vec<Part<'_>> {
        vec![
            Part::Text("title", "Sunset"),
            Part::Text("description", "Timelapse over the bay"),
            Part::File {
                name: "videoFile",
                file_name: "sunset.mp4",
                content_type: "video/mp4",
                bytes: video,
            },
            Part::File {
                name: "thumbnail",
                file_name: "sunset.png",
                content_type: "image/png",
                bytes: b"\x89PNG\r\n\x1a\nfake",
            },
        ]
    }

    #[tokio::test]
    async fn health_endpoints_report_ok() {
        let h = Harness::new().await;

        let res = h.get("/healthz", None).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = h.get("/readyz", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["checks"]["records"]["ok"], true);
        assert_eq!(body["checks"]["assets"]["ok"], true);
        assert_eq!(body["checks"]["staging"]["ok"], true);
    }

    #[tokio::test]
    async fn unusable_staging_dir_fails_readiness() {
        let h = Harness::new().await;
        tokio::fs::write(&h.staging_dir, b"not a directory").await.unwrap();

        let res = h.get("/readyz", None).await;

        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(res).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["checks"]["staging"]["ok"], false);
        assert!(body["checks"]["staging"]["error"].is_string());
        assert_eq!(body["checks"]["assets"]["ok"], true);
    }

    #[tokio::test]
    async fn anonymous_upload_is_401() {
        let h = Harness::new().await;
        let video = mp4_with_duration(1000, 4500);

        let res = h.upload(None, &full_upload(&video)).await;

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(res).await;
        assert_eq!(body["status"], 401);
    }

    #[tokio::test]
    async fn bad_tokens_are_401_even_on_reads() {
        let h = Harness::new().await;

        let res = h.get("/api/v1/videos", Some("Bearer nope")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = h.get("/api/v1/videos", Some("Basic abc")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_thumbnail_is_400_naming_the_field() {
        let h = Harness::new().await;
        let video = mp4_with_duration(1000, 4500);
        let mut parts = full_upload(&video);
        parts.pop();

        let res = h.upload(Some(&h.bearer("alice")), &parts).await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = json_body(res).await;
        assert!(body["error"].as_str().unwrap().contains("thumbnail"));
    }

    #[tokio::test]
    async fn upload_creates_owned_private_media_with_served_assets() {
        let h = Harness::new().await;
        let alice = h.bearer("alice");
        let video = mp4_with_duration(1000, 4500);

        let res = h.upload(Some(&alice), &full_upload(&video)).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json_body(res).await;
        assert_eq!(body["status"], 201);
        assert_eq!(body["message"], "Video was published successfully");

        let media = &body["data"];
        assert_eq!(media["ownerId"], "alice");
        assert_eq!(media["durationSeconds"], 4.5);
        assert_eq!(media["isPublished"], false);
        assert_eq!(media["version"], 1);

        // staged copies are gone once the request finished
        let mut leftovers = tokio::fs::read_dir(&h.staging_dir).await.unwrap();
        assert!(leftovers.next_entry().await.unwrap().is_none());

        let asset_path = media["assetUrl"]
            .as_str()
            .unwrap()
            .strip_prefix(PUBLIC_ORIGIN)
            .unwrap()
            .to_string();
        let res = h.get(&asset_path, None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "video/mp4");
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], &video[..]);

        let uri = format!("/api/v1/videos/{}", media["id"].as_str().unwrap());
        assert_eq!(h.get(&uri, None).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            h.get(&uri, Some(&h.bearer("bob"))).await.status(),
            StatusCode::NOT_FOUND
        );
        let res = h.get(&uri, Some(&alice)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["data"]["title"], "Sunset");
    }

    #[tokio::test]
    async fn owner_comes_from_the_token_not_the_form() {
        let h = Harness::new().await;
        let video = mp4_with_duration(1000, 1000);
        let mut parts = full_upload(&video);
        parts.insert(0, Part::Text("ownerId", "mallory"));
        parts.push(Part::Text("owner", "mallory"));

        let res = h.upload(Some(&h.bearer("alice")), &parts).await;

        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json_body(res).await;
        assert_eq!(body["data"]["ownerId"], "alice");

        let listed = json_body(h.get("/api/v1/videos?userId=mallory", Some(&h.bearer("mallory"))).await).await;
        assert_eq!(listed["data"]["total"], 0);
    }

    #[tokio::test]
    async fn toggle_and_delete_are_owner_only() {
        let h = Harness::new().await;
        let alice = h.bearer("alice");
        let bob = h.bearer("bob");
        let video = mp4_with_duration(600, 600);
        let body = json_body(h.upload(Some(&alice), &full_upload(&video)).await).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let toggle = |auth: String| {
            Request::builder()
                .method("PATCH")
                .uri(format!("/api/v1/videos/toggle/publish/{id}"))
                .header(header::AUTHORIZATION, auth)
                .body(Body::empty())
                .unwrap()
        };

        let res = h.send(toggle(bob.clone())).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = h.send(toggle(alice.clone())).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["data"]["isPublished"], true);

        let listed = json_body(h.get("/api/v1/videos", None).await).await;
        assert_eq!(listed["data"]["total"], 1);

        let delete = |auth: String| {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/videos/{id}"))
                .header(header::AUTHORIZATION, auth)
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(h.send(delete(bob)).await.status(), StatusCode::FORBIDDEN);
        let res = h.send(delete(alice)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["data"]["deleted"], true);

        let uri = format!("/api/v1/videos/{id}");
        assert_eq!(h.get(&uri, None).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_assets_are_404() {
        let h = Harness::new().await;
        let res = h.get("/assets/videos/missing.mp4", None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
