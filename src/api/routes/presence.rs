//! Meeting presence endpoints.

use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};

use crate::api::ApiState;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/presence", get(presence_state))
        .route("/presence/inspector", get(inspector_status))
        .with_state(state)
}

/// Current fused presence state with its evidence snapshot.
async fn presence_state(State(state): State<ApiState>) -> Json<Value> {
    let presence = state.detector.state();
    Json(json!({
        "polling": state.detector.is_polling(),
        "state": presence,
    }))
}

/// Liveness of the native helper.
async fn inspector_status(State(state): State<ApiState>) -> Json<Value> {
    let running = state.inspector.check_status().await;
    Json(json!({
        "running": running,
        "token_set": state.token.is_set(),
    }))
}
