//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> the record store answers, and both the asset and the
//!   staging directory accept writes

use crate::{db, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, fmt::Display};
use tracing::warn;

/// `GET /healthz`
///
/// Liveness only; never touches storage.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// 503 as soon as one check fails; uploads need all three.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (records, assets, staging) = tokio::join!(
        db::ping(&state.db),
        state.assets.check_writable(),
        state.staging.check_writable(),
    );
    let checks = BTreeMap::from([
        ("records", CheckStatus::from(records)),
        ("assets", CheckStatus::from(assets)),
        ("staging", CheckStatus::from(staging)),
    ]);

    let ready = checks.values().all(|check| check.ok);
    if !ready {
        warn!(?checks, "readiness check failed");
    }
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize, Debug)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl<E: Display> From<Result<(), E>> for CheckStatus {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(err) => Self {
                ok: false,
                error: Some(err.to_string()),
            },
        }
    }
}
