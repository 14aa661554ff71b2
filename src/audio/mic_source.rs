//! Microphone capture via cpal.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::chunk_source::{encode_pcm16, ChunkSource};
use crate::uplink::StreamKind;

pub struct MicChunkSource {
    device: cpal::Device,
    config: cpal::StreamConfig,
    stream: Option<cpal::Stream>,
    active: bool,
    chunk_samples: usize,
}

impl MicChunkSource {
    /// Create a mic source on the default input device.
    ///
    /// # Arguments
    /// * `sample_rate` - Capture sample rate (e.g. 16000)
    /// * `chunk_duration_ms` - How much audio each emitted chunk carries
    pub fn new(sample_rate: u32, chunk_duration_ms: u64) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("No input device available for mic capture")?;

        info!(
            "Mic source using device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let chunk_samples = (sample_rate as u64 * chunk_duration_ms / 1000).max(1) as usize;

        Ok(Self {
            device,
            config,
            stream: None,
            active: false,
            chunk_samples,
        })
    }
}

impl ChunkSource for MicChunkSource {
    fn start(&mut self, sink: mpsc::Sender<Vec<u8>>) -> Result<()> {
        if self.active {
            return Err(anyhow::anyhow!("Mic source already capturing"));
        }

        let chunk_samples = self.chunk_samples;
        let mut buffer: Vec<f32> = Vec::with_capacity(chunk_samples);
        let err_fn = |err| error!("Mic stream error: {}", err);

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                buffer.extend_from_slice(data);
                while buffer.len() >= chunk_samples {
                    let rest = buffer.split_off(chunk_samples);
                    let chunk = encode_pcm16(&buffer);
                    buffer = rest;
                    // Realtime thread: never block. A full channel means
                    // the pump is behind; drop here and let the uplink
                    // queue's recency policy handle the rest.
                    if sink.try_send(chunk).is_err() {
                        debug!("Mic chunk channel full, dropping chunk");
                    }
                }
            },
            err_fn,
            None,
        )?;

        stream.play()?;
        self.stream = Some(stream);
        self.active = true;

        info!("Mic capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("Stopping mic stream");
            drop(stream);
        }
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Microphone
    }
}

impl Drop for MicChunkSource {
    fn drop(&mut self) {
        if self.active {
            debug!("Dropping active MicChunkSource, cleaning up");
            self.stop();
        }
    }
}
