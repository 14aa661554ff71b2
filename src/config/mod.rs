use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub uplink: UplinkConfig,
    pub inspector: InspectorConfig,
    pub presence: PresenceConfig,
    pub audio: AudioConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    /// WebSocket base URL of the transcription backend. Streams attach
    /// at `{base_url}/mic` and `{base_url}/system`.
    pub base_url: String,
    /// Chunks buffered per stream while the connection is down.
    pub queue_capacity: usize,
    pub handshake_timeout_seconds: u64,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://127.0.0.1:8765".to_string(),
            queue_capacity: 100,
            handshake_timeout_seconds: 5,
        }
    }
}

impl UplinkConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// HTTP base URL of the native process-inspection helper.
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            request_timeout_seconds: 3,
        }
    }
}

impl InspectorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub poll_interval_ms: u64,
    /// Additional meeting app bundle ids, merged with the built-ins.
    pub extra_meeting_bundles: Vec<String>,
    /// Additional meeting URL regexes, merged with the built-ins.
    pub extra_meeting_url_patterns: Vec<String>,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            extra_meeting_bundles: Vec::new(),
            extra_meeting_url_patterns: Vec::new(),
        }
    }
}

impl PresenceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub chunk_duration_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            chunk_duration_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 7337 }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = global::config_file()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.uplink.base_url, "ws://127.0.0.1:8765");
        assert_eq!(config.uplink.queue_capacity, 100);
        assert_eq!(config.presence.poll_interval_ms, 2000);
        assert_eq!(config.presence.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.inspector.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.audio.sample_rate, 16000);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [presence]
            poll_interval_ms = 500
            extra_meeting_bundles = ["com.example.meet"]
            "#,
        )
        .unwrap();

        assert_eq!(config.presence.poll_interval_ms, 500);
        assert_eq!(config.presence.extra_meeting_bundles, vec!["com.example.meet"]);
        // Untouched sections keep their defaults.
        assert_eq!(config.uplink.queue_capacity, 100);
        assert_eq!(config.api.port, 7337);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        // First load creates the default file.
        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.uplink.queue_capacity, 100);

        // Second load reads it back.
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.uplink.base_url, created.uplink.base_url);
        assert_eq!(loaded.presence.poll_interval_ms, 2000);
    }
}
