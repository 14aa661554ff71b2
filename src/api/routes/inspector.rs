//! Out-of-band session token delivery.
//!
//! The native helper publishes its session token once at startup by
//! posting it here; the cell keeps the first value for the life of the
//! process.

use axum::{extract::State, response::Json, routing::post, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::ApiState;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/inspector/token", post(set_token))
        .with_state(state)
}

async fn set_token(
    State(state): State<ApiState>,
    Json(request): Json<TokenRequest>,
) -> Json<Value> {
    info!("Inspector session token delivered");
    state.token.set(request.token);
    Json(json!({ "success": true }))
}
