//! `/config/` renderer-configuration CRUD surface (spec §6).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};

use super::{ApiError, AppState};
use crate::model::RendererConfig;

async fn create_config(
    State(state): State<AppState>,
    Json(cfg): Json<RendererConfig>,
) -> Result<StatusCode, ApiError> {
    state.engine.create_config(cfg).await?;
    Ok(StatusCode::CREATED)
}

async fn update_config(
    State(state): State<AppState>,
    Json(cfg): Json<RendererConfig>,
) -> Result<StatusCode, ApiError> {
    state.engine.update_config(cfg).await?;
    Ok(StatusCode::OK)
}

async fn delete_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_config(&id).await?;
    Ok(StatusCode::OK)
}

async fn list_configs(
    State(state): State<AppState>,
) -> Result<Json<Vec<RendererConfig>>, ApiError> {
    Ok(Json(state.engine.list_configs().await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config/", post(create_config).put(update_config).get(list_configs))
        .route("/config/:id", axum::routing::delete(delete_config))
}
