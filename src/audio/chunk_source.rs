//! Audio chunk producer abstraction.

use anyhow::Result;
use tokio::sync::mpsc;

use crate::uplink::StreamKind;

/// A capture source that emits fixed-cadence PCM16 chunks into a channel
/// for the uplink pump. Sources capture independently; a source that
/// cannot start (e.g. no monitor device) may degrade to inactive rather
/// than fail the session.
///
/// Not `Send`: cpal streams are tied to the thread that created them, so
/// sources live with the session machine on the main task.
pub trait ChunkSource {
    /// Begin capturing, delivering encoded chunks into `sink`.
    fn start(&mut self, sink: mpsc::Sender<Vec<u8>>) -> Result<()>;

    /// Stop capturing and release the device.
    fn stop(&mut self);

    /// Whether this source is currently capturing.
    fn is_active(&self) -> bool;

    /// Which uplink this source feeds.
    fn kind(&self) -> StreamKind;
}

/// Convert f32 samples to little-endian PCM16 bytes.
pub(crate) fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
