use anyhow::Result;
use media_store::{
    auth::TokenVerifier,
    config::{AppConfig, StartupMode},
    db,
    routes::routes::build_app,
    services::{assets::LocalAssetStore, staging::UploadStaging},
    state::AppState,
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const ISSUED_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + startup mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    if let StartupMode::IssueToken(subject) = &mode {
        let token = TokenVerifier::new(&cfg.jwt_secret).issue(subject, None, ISSUED_TOKEN_TTL)?;
        println!("{token}");
        return Ok(());
    }

    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        asset_dir = %cfg.asset_dir,
        staging_dir = %cfg.staging_dir,
        database_url = %cfg.database_url,
        public_url = %cfg.public_url,
        "Starting media-store"
    );
    if cfg.uses_dev_secret() {
        tracing::warn!("MEDIA_STORE_JWT_SECRET is not set; using the development secret");
    }

    // --- Ensure storage directories exist ---
    for dir in [&cfg.asset_dir, &cfg.staging_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url, 5).await?);

    // --- Handle migration mode ---
    if mode == StartupMode::Migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize services ---
    let state = AppState::new(
        db,
        LocalAssetStore::new(&cfg.asset_dir, cfg.asset_base_url()),
        UploadStaging::new(&cfg.staging_dir),
        TokenVerifier::new(&cfg.jwt_secret),
    );
    let app = build_app(state, cfg.max_upload_bytes);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
