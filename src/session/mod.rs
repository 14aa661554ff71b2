//! Recording session orchestrator.
//!
//! Wires the pieces together for one live session: two uplinks (mic,
//! system), their capture sources, and the presence detector. Start and
//! stop are the only lifecycle operations; nothing survives a stop.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audio::ChunkSource;
use crate::presence::PresenceDetector;
use crate::uplink::{StreamKind, StreamUplink, TransportConnector};

/// Phase of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Recording,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Recording => "recording",
        }
    }
}

/// Current session state, readable by API handlers.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            started_at: None,
            last_error: None,
        }
    }
}

/// Thread-safe handle for sharing session state with API handlers.
#[derive(Clone, Default)]
pub struct SessionStatusHandle {
    inner: Arc<Mutex<SessionStatus>>,
}

impl SessionStatusHandle {
    pub async fn get(&self) -> SessionStatus {
        self.inner.lock().await.clone()
    }

    async fn set_recording(&self) {
        let mut status = self.inner.lock().await;
        status.phase = SessionPhase::Recording;
        status.started_at = Some(Utc::now());
        status.last_error = None;
    }

    async fn set_idle(&self) {
        let mut status = self.inner.lock().await;
        status.phase = SessionPhase::Idle;
        status.started_at = None;
    }

    pub async fn set_error(&self, error: String) {
        let mut status = self.inner.lock().await;
        status.last_error = Some(error);
    }
}

/// Tuning knobs for a session, sourced from config.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub queue_capacity: usize,
    pub poll_interval: Duration,
}

struct ActiveSession {
    mic_uplink: StreamUplink,
    system_uplink: StreamUplink,
    pumps: Vec<JoinHandle<()>>,
}

/// Outcome of a toggle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started,
    Stopped,
}

pub struct SessionMachine {
    mic_source: Box<dyn ChunkSource>,
    system_source: Box<dyn ChunkSource>,
    connector: Arc<dyn TransportConnector>,
    detector: PresenceDetector,
    options: SessionOptions,
    status: SessionStatusHandle,
    active: Option<ActiveSession>,
}

impl SessionMachine {
    pub fn new(
        mic_source: Box<dyn ChunkSource>,
        system_source: Box<dyn ChunkSource>,
        connector: Arc<dyn TransportConnector>,
        detector: PresenceDetector,
        options: SessionOptions,
        status: SessionStatusHandle,
    ) -> Self {
        Self {
            mic_source,
            system_source,
            connector,
            detector,
            options,
            status,
            active: None,
        }
    }

    /// Start a recording session: create the uplinks, start capture and
    /// begin presence polling.
    pub async fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            bail!("Session already recording. Stop it first or use toggle.");
        }

        let mic_uplink = self.make_uplink(StreamKind::Microphone).await;
        let system_uplink = self.make_uplink(StreamKind::SystemAudio).await;

        let (mic_tx, mic_rx) = mpsc::channel::<Vec<u8>>(32);
        self.mic_source.start(mic_tx)?;

        let (system_tx, system_rx) = mpsc::channel::<Vec<u8>>(32);
        if let Err(e) = self.system_source.start(system_tx) {
            warn!("Failed to start system audio: {}. Recording mic only.", e);
        }

        let pumps = vec![
            spawn_pump(mic_uplink.clone(), mic_rx),
            spawn_pump(system_uplink.clone(), system_rx),
        ];

        self.detector.start_polling(self.options.poll_interval);
        self.status.set_recording().await;
        self.active = Some(ActiveSession {
            mic_uplink,
            system_uplink,
            pumps,
        });

        info!("Recording session started");
        Ok(())
    }

    /// Stop the session: stop capture, close both uplinks (discarding any
    /// queued chunks) and reset the presence detector.
    pub async fn stop(&mut self) -> Result<()> {
        let session = match self.active.take() {
            Some(session) => session,
            None => bail!("No recording session in progress"),
        };

        self.mic_source.stop();
        self.system_source.stop();

        // Capture senders are gone; let the pumps drain what they hold
        // before tearing the uplinks down.
        for pump in session.pumps {
            let _ = pump.await;
        }

        session.mic_uplink.close().await;
        session.system_uplink.close().await;
        self.detector.reset();
        self.status.set_idle().await;

        info!("Recording session stopped");
        Ok(())
    }

    pub async fn toggle(&mut self) -> Result<ToggleOutcome> {
        if self.active.is_some() {
            self.stop().await?;
            Ok(ToggleOutcome::Stopped)
        } else {
            self.start().await?;
            Ok(ToggleOutcome::Started)
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    async fn make_uplink(&self, kind: StreamKind) -> StreamUplink {
        let uplink = StreamUplink::new(kind, Arc::clone(&self.connector), self.options.queue_capacity);
        uplink
            .on_message(|message| {
                info!("Transcript [{}]: {}", message.stream, message.text);
            })
            .await;
        uplink
    }
}

fn spawn_pump(uplink: StreamUplink, mut rx: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            uplink.send(chunk).await;
        }
    })
}
