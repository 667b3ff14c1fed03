//! `/admin/suspend`, `/admin/resume` — Global Policy surface (spec §6, §4.7).

use axum::extract::State;
use axum::routing::put;
use axum::{Json, Router};
use serde::Serialize;

use super::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct PolicyResponse {
    pub session_creation_enabled: bool,
}

async fn suspend(State(state): State<AppState>) -> Result<Json<PolicyResponse>, ApiError> {
    let enabled = state.engine.suspend().await?;
    Ok(Json(PolicyResponse {
        session_creation_enabled: enabled,
    }))
}

async fn resume(State(state): State<AppState>) -> Result<Json<PolicyResponse>, ApiError> {
    let enabled = state.engine.resume().await?;
    Ok(Json(PolicyResponse {
        session_creation_enabled: enabled,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/suspend", put(suspend))
        .route("/admin/resume", put(resume))
}
