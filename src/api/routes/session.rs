//! Recording session endpoints.

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;

/// Commands forwarded from API handlers to the session machine.
#[derive(Clone)]
pub enum ApiCommand {
    ToggleSession,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/toggle", post(toggle_session))
        .route("/session/status", get(session_status))
        .with_state(state)
}

async fn toggle_session(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    info!("Toggle session command received via API");

    state
        .tx
        .send(ApiCommand::ToggleSession)
        .await
        .map_err(|e| {
            error!("Failed to send toggle command: {}", e);
            ApiError::internal("Session machine unavailable")
        })?;

    // Small delay so the returned phase reflects the toggle.
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    let status = state.status.get().await;

    Ok(Json(json!({
        "success": true,
        "phase": status.phase.as_str(),
    })))
}

async fn session_status(State(state): State<ApiState>) -> Json<Value> {
    let status = state.status.get().await;
    Json(json!({
        "phase": status.phase.as_str(),
        "started_at": status.started_at,
        "last_error": status.last_error,
    }))
}
