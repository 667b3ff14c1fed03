//! HTTP boundary (spec §6's REST surface). Out of scope for the session
//! lifecycle engine itself — this module only translates requests into
//! engine calls and engine errors into status codes.

pub mod admin_routes;
pub mod config_routes;
pub mod session_routes;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Wraps `AppError` so handlers can return it directly with `?` and have
/// it mapped to the status codes `AppError::status_code` defines (spec §7:
/// "Engine operations always return a status code plus a message; they
/// never propagate opaque exceptions to the HTTP boundary.").
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn build_router(engine: Arc<Engine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(session_routes::router())
        .merge(config_routes::router())
        .merge(admin_routes::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
