//! Local REST control surface.
//!
//! Endpoints:
//! - `POST /toggle`: start/stop a recording session
//! - `GET /session/status`: session phase
//! - `GET /presence`: fused presence state with evidence
//! - `GET /presence/inspector`: helper liveness
//! - `POST /inspector/token`: out-of-band session token delivery

pub mod error;
pub mod routes;

use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;

use crate::inspector::{InspectorClient, SessionTokenCell};
use crate::presence::PresenceDetector;
use crate::session::SessionStatusHandle;

pub use routes::session::ApiCommand;

/// Shared state handed to route handlers.
#[derive(Clone)]
pub struct ApiState {
    pub tx: tokio::sync::mpsc::Sender<ApiCommand>,
    pub status: SessionStatusHandle,
    pub detector: PresenceDetector,
    pub inspector: Arc<InspectorClient>,
    pub token: SessionTokenCell,
}

pub struct ApiServer {
    port: u16,
    state: ApiState,
}

impl ApiServer {
    pub fn new(port: u16, state: ApiState) -> Self {
        Self { port, state }
    }

    pub async fn start(self) -> Result<()> {
        let app = Router::new()
            .route("/", get(service_status))
            .route("/version", get(version))
            .merge(routes::session::router(self.state.clone()))
            .merge(routes::presence::router(self.state.clone()))
            .merge(routes::inspector::router(self.state.clone()))
            .layer(ServiceBuilder::new());

        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;
        info!("Control API listening on 127.0.0.1:{}", self.port);

        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn service_status() -> Json<Value> {
    Json(json!({
        "service": "remi",
        "status": "running",
    }))
}

async fn version() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}
