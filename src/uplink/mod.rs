//! Real-time audio uplink to the transcription backend.
//!
//! One `StreamUplink` per logical audio stream (mic, system). Each uplink
//! owns a persistent WebSocket connection and a bounded chunk queue that
//! absorbs producer/transport rate mismatch while the connection is down.

pub mod queue;
pub mod stream;
pub mod transport;

pub use queue::ChunkQueue;
pub use stream::{StreamUplink, TranscriptionMessage};
pub use transport::{FrameSink, FrameStream, TransportConnector, TransportError, WsConnector};

use serde::{Deserialize, Serialize};

/// Which physical audio source an uplink serves. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    #[serde(rename = "mic")]
    Microphone,
    #[serde(rename = "system")]
    SystemAudio,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Microphone => "mic",
            StreamKind::SystemAudio => "system",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
