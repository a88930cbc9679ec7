use media_store::{
    auth::TokenVerifier,
    client::{
        AuthorizedClient, Credential, ListParams, MediaClient, MediaUpdate, NewUpload, UploadPart,
    },
    db,
    routes::routes::build_app,
    scheduler::DeletionScheduler,
    services::{assets::LocalAssetStore, staging::UploadStaging},
    state::AppState,
};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::net::TcpListener;

const SECRET: &str = "end-to-end-secret";

struct Server {
    client: MediaClient,
    tokens: TokenVerifier,
    _dir: TempDir,
}

impl Server {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_url = format!("sqlite://{}", dir.path().join("meta/media.db").display());
        let pool = db::connect(&db_url, 5).await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let asset_dir = dir.path().join("assets");
        tokio::fs::create_dir_all(&asset_dir).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let state = AppState::new(
            Arc::new(pool),
            LocalAssetStore::new(asset_dir, format!("{base_url}/assets")),
            UploadStaging::new(dir.path().join("staging")),
            TokenVerifier::new(SECRET),
        );
        let app = build_app(state, 8 * 1024 * 1024);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            client: MediaClient::new(base_url),
            tokens: TokenVerifier::new(SECRET),
            _dir: dir,
        }
    }

    fn credential(&self, subject: &str) -> Credential {
        let token = self
            .tokens
            .issue(subject, None, Duration::from_secs(600))
            .unwrap();
        Credential::bearer(token)
    }
}

fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

/// `ftyp` + `moov{mvhd}` + `mdat` declaring `duration / timescale` seconds.
fn mp4(timescale: u32, duration: u32) -> Vec<u8> {
    let mut mvhd = vec![0u8; 100];
    mvhd[12..16].copy_from_slice(&timescale.to_be_bytes());
    mvhd[16..20].copy_from_slice(&duration.to_be_bytes());

    let mut file = mp4_box(b"ftyp", b"isom\0\0\x02\0isomiso2mp41");
    file.extend(mp4_box(b"moov", &mp4_box(b"mvhd", &mvhd)));
    file.extend(mp4_box(b"mdat", &[1u8; 256]));
    file
}

fn upload(title: &str, video: &[u8]) -> NewUpload {
    NewUpload {
        title: title.into(),
        description: format!("{title} description"),
        video: UploadPart::new("clip.mp4", "video/mp4", video.to_vec()),
        thumbnail: UploadPart::new("cover.png", "image/png", b"\x89PNG\r\n\x1a\ncover".to_vec()),
        is_published: None,
    }
}

#[tokio::test]
async fn media_lifecycle_over_http() {
    let server = Server::start().await;
    let api = &server.client;
    let alice = server.credential("alice");
    let bob = server.credential("bob");
    let video = mp4(1000, 4500);

    let created = api.create_media(&alice, upload("Harbour", &video)).await.unwrap();
    assert_eq!(created.owner_id, "alice");
    assert_eq!(created.duration_seconds, 4.5);
    assert!(!created.is_published);

    // private media is invisible to everyone else
    let err = api.get_media(None, created.id).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    let err = api.get_media(Some(&bob), created.id).await.unwrap_err();
    assert_eq!(err.status(), Some(404));

    // non-owners cannot flip visibility
    let err = api.toggle_publish(&bob, created.id).await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    let unchanged = api.get_media(Some(&alice), created.id).await.unwrap();
    assert_eq!(unchanged, created);

    let state = api.toggle_publish(&alice, created.id).await.unwrap();
    assert!(state.is_published);
    let public = api.get_media(None, created.id).await.unwrap();
    assert!(public.is_published);

    // title-only edit leaves everything else alone
    let update = MediaUpdate {
        title: Some("Harbour at dusk".into()),
        ..Default::default()
    };
    let edited = api.update_media(&alice, created.id, update).await.unwrap();
    assert_eq!(edited.title, "Harbour at dusk");
    assert_eq!(edited.description, created.description);
    assert_eq!(edited.thumbnail_url, created.thumbnail_url);
    assert!(edited.is_published);

    let err = api
        .update_media(&bob, created.id, MediaUpdate {
            description: Some("mine now".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(403));

    let served = reqwest::get(&created.asset_url)
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(&served[..], &video[..]);

    let params = ListParams {
        owner_id: Some("alice".into()),
        ..Default::default()
    };
    let page = api.list_media(None, &params).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.videos[0].id, created.id);

    let params = ListParams {
        query: Some("dusk".into()),
        sort_by: Some("title".into()),
        sort_type: Some("asc".into()),
        ..Default::default()
    };
    let page = api.list_media(None, &params).await.unwrap();
    assert_eq!(page.total, 1);

    let params = ListParams {
        sort_by: Some("owner".into()),
        ..Default::default()
    };
    let err = api.list_media(None, &params).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
}

#[tokio::test]
async fn forged_tokens_cannot_upload() {
    let server = Server::start().await;
    let forged = Credential::bearer("not-a-jwt");

    let err = server
        .client
        .create_media(&forged, upload("Nope", &mp4(1000, 1000)))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));

    let page = server
        .client
        .list_media(None, &ListParams::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn scheduled_deletion_runs_unless_undone() {
    let server = Server::start().await;
    let alice = server.credential("alice");
    let video = mp4(1000, 2000);
    let keep = server
        .client
        .create_media(&alice, upload("Keep", &video))
        .await
        .unwrap();
    let doomed = server
        .client
        .create_media(&alice, upload("Drop", &video))
        .await
        .unwrap();

    let deleter = AuthorizedClient::new(server.client.clone(), alice.clone());
    let scheduler = DeletionScheduler::with_delay(Arc::new(deleter), Duration::from_millis(200));
    scheduler.set_view([keep.id, doomed.id]);

    assert_eq!(scheduler.schedule([keep.id, doomed.id]), 2);
    assert_eq!(scheduler.cancel([keep.id]), 1);

    tokio::time::sleep(Duration::from_millis(800)).await;

    assert_eq!(scheduler.view(), vec![keep.id]);
    assert!(scheduler.pending_ids().is_empty());
    let err = server
        .client
        .get_media(Some(&alice), doomed.id)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(server.client.get_media(Some(&alice), keep.id).await.is_ok());
}
