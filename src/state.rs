//! Shared application state handed to every handler.

use crate::{
    auth::TokenVerifier,
    services::{
        assets::LocalAssetStore, media_service::MediaService, records::SqliteMediaStore,
        staging::UploadStaging,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub media: MediaService,
    pub assets: Arc<LocalAssetStore>,
    pub staging: UploadStaging,
    pub tokens: Arc<TokenVerifier>,
    pub db: Arc<SqlitePool>,
}

impl AppState {
    /// Wire the local asset store and the SQLite record store into one
    /// service.
    pub fn new(
        db: Arc<SqlitePool>,
        assets: LocalAssetStore,
        staging: UploadStaging,
        tokens: TokenVerifier,
    ) -> Self {
        let assets = Arc::new(assets);
        let records = Arc::new(SqliteMediaStore::new(db.clone()));
        Self {
            media: MediaService::new(assets.clone(), records),
            assets,
            staging,
            tokens: Arc::new(tokens),
            db,
        }
    }
}
