//! Service wiring.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::api::{ApiCommand, ApiServer, ApiState};
use crate::audio::{MicChunkSource, SystemChunkSource};
use crate::config::Config;
use crate::inspector::{InspectorClient, ProcessInspector, SessionTokenCell};
use crate::presence::{MeetingRules, PresenceDetector};
use crate::session::{SessionMachine, SessionOptions, SessionStatusHandle, ToggleOutcome};
use crate::uplink::{TransportConnector, WsConnector};

pub async fn run_service() -> Result<()> {
    info!("Starting Remi core service");

    let config = Config::load()?;

    let token = SessionTokenCell::default();
    let inspector = Arc::new(InspectorClient::new(
        config.inspector.base_url.clone(),
        config.inspector.request_timeout(),
        token.clone(),
    )?);

    let rules = MeetingRules::with_extras(
        &config.presence.extra_meeting_bundles,
        &config.presence.extra_meeting_url_patterns,
    )?;
    let detector = PresenceDetector::new(
        Arc::clone(&inspector) as Arc<dyn ProcessInspector>,
        rules,
    );
    let _presence_log = detector.subscribe(|state| {
        info!(
            "Presence changed: in_meeting={} (process={}, tab={})",
            state.in_meeting,
            state.evidence.meeting_process_active,
            state.evidence.meeting_tab_active
        );
    });

    let connector: Arc<dyn TransportConnector> = Arc::new(WsConnector::new(
        config.uplink.base_url.clone(),
        config.uplink.handshake_timeout(),
    ));

    let mic_source = MicChunkSource::new(config.audio.sample_rate, config.audio.chunk_duration_ms)?;
    let system_source = SystemChunkSource::new(config.audio.sample_rate, config.audio.chunk_duration_ms);

    let status = SessionStatusHandle::default();
    let mut machine = SessionMachine::new(
        Box::new(mic_source),
        Box::new(system_source),
        connector,
        detector.clone(),
        SessionOptions {
            queue_capacity: config.uplink.queue_capacity,
            poll_interval: config.presence.poll_interval(),
        },
        status.clone(),
    );

    let (tx, mut rx) = mpsc::channel::<ApiCommand>(10);
    let api_server = ApiServer::new(
        config.api.port,
        ApiState {
            tx,
            status: status.clone(),
            detector,
            inspector,
            token,
        },
    );
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    info!("Remi core is ready");
    info!(
        "Toggle a session: curl -X POST http://127.0.0.1:{}/toggle",
        config.api.port
    );

    while let Some(command) = rx.recv().await {
        match command {
            ApiCommand::ToggleSession => match machine.toggle().await {
                Ok(ToggleOutcome::Started) => info!("Recording session started"),
                Ok(ToggleOutcome::Stopped) => info!("Recording session stopped"),
                Err(e) => {
                    error!("Failed to toggle session: {}", e);
                    status.set_error(e.to_string()).await;
                }
            },
        }
    }

    Ok(())
}
