//! System audio capture (what others say on Zoom/Meet/etc.).
//!
//! Captures from a PipeWire/PulseAudio monitor source, which exposes the
//! system's audio output as an input device. If no monitor device exists
//! the source degrades gracefully: the session records mic only.

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::chunk_source::{encode_pcm16, ChunkSource};
use crate::uplink::StreamKind;

pub struct SystemChunkSource {
    stream: Option<cpal::Stream>,
    active: bool,
    sample_rate: u32,
    chunk_duration_ms: u64,
}

impl SystemChunkSource {
    pub fn new(sample_rate: u32, chunk_duration_ms: u64) -> Self {
        Self {
            stream: None,
            active: false,
            sample_rate,
            chunk_duration_ms,
        }
    }

    /// Find a monitor input device and its native sample rate.
    fn find_monitor_device() -> Option<(cpal::Device, u32)> {
        let host = cpal::default_host();

        for device in host.input_devices().ok()? {
            if let Ok(name) = device.name() {
                if name.to_lowercase().contains("monitor") {
                    if let Ok(default_config) = device.default_input_config() {
                        let sample_rate = default_config.sample_rate().0;
                        info!("Found system audio monitor: {} ({}Hz)", name, sample_rate);
                        return Some((device, sample_rate));
                    }
                }
            }
        }

        None
    }
}

impl ChunkSource for SystemChunkSource {
    fn start(&mut self, sink: mpsc::Sender<Vec<u8>>) -> Result<()> {
        if self.active {
            return Err(anyhow::anyhow!("System audio source already capturing"));
        }

        let (device, device_rate) = match Self::find_monitor_device() {
            Some(found) => found,
            None => {
                warn!("No system audio monitor device found; system stream disabled");
                return Ok(());
            }
        };

        // Capture at the device's native rate; the backend resamples.
        let rate = if device_rate > 0 { device_rate } else { self.sample_rate };
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let chunk_samples = (rate as u64 * self.chunk_duration_ms / 1000).max(1) as usize;
        let mut buffer: Vec<f32> = Vec::with_capacity(chunk_samples);
        let err_fn = |err| error!("System audio stream error: {}", err);

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                buffer.extend_from_slice(data);
                while buffer.len() >= chunk_samples {
                    let rest = buffer.split_off(chunk_samples);
                    let chunk = encode_pcm16(&buffer);
                    buffer = rest;
                    if sink.try_send(chunk).is_err() {
                        debug!("System chunk channel full, dropping chunk");
                    }
                }
            },
            err_fn,
            None,
        )?;

        stream.play()?;
        self.stream = Some(stream);
        self.active = true;

        info!("System audio capture started ({}Hz)", rate);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("Stopping system audio stream");
            drop(stream);
        }
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn kind(&self) -> StreamKind {
        StreamKind::SystemAudio
    }
}

impl Drop for SystemChunkSource {
    fn drop(&mut self) {
        if self.active {
            debug!("Dropping active SystemChunkSource, cleaning up");
            self.stop();
        }
    }
}
