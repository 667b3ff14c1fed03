//! `/session/`, `/session/keep_alive`, `/sessions/` (spec §6).

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiError, AppState};

/// Synthetic node id for time-based session ids — this process never talks
/// to a real network card, so there is no MAC address to borrow (spec §6:
/// "Session ID: time-based UUID generated server-side at creation.").
const NODE_ID: [u8; 6] = [0x52, 0x52, 0x4d, 0x00, 0x00, 0x01];

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub owner: String,
    pub configuration_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: Uuid,
    pub code: u16,
    pub description: String,
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct SessionIdQuery {
    pub session_id: Uuid,
}

async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let session_id = Uuid::now_v1(&NODE_ID);
    let view = state
        .engine
        .create_session(session_id, body.owner, body.configuration_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session: view.session_id,
            code: view.status_code,
            description: view.status_text,
            hostname: view.hostname,
            port: view.port,
        }),
    ))
}

async fn query_status(
    State(state): State<AppState>,
    Query(q): Query<SessionIdQuery>,
) -> Result<Json<SessionResponse>, ApiError> {
    let view = state.engine.query_status(q.session_id).await?;
    Ok(Json(SessionResponse {
        session: view.session_id,
        code: view.status_code,
        description: view.status_text,
        hostname: view.hostname,
        port: view.port,
    }))
}

async fn delete_session(
    State(state): State<AppState>,
    Query(q): Query<SessionIdQuery>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_session(q.session_id).await?;
    Ok(StatusCode::OK)
}

async fn keep_alive(
    State(state): State<AppState>,
    Query(q): Query<SessionIdQuery>,
) -> Result<StatusCode, ApiError> {
    state.engine.keep_alive(q.session_id).await?;
    Ok(StatusCode::OK)
}

async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<crate::model::Session>>, ApiError> {
    Ok(Json(state.engine.list_sessions().await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session/", post(create_session).get(query_status).delete(delete_session))
        .route("/session/keep_alive", put(keep_alive))
        .route("/sessions/", get(list_sessions))
}
