use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionConfig;

/// Prefix for environment overrides, e.g. `VOICE_ONBOARDING__BACKEND__BASE_URL`
const ENV_PREFIX: &str = "VOICE_ONBOARDING";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub backend: BackendConfig,
    pub audio: AudioConfig,
    pub devices: DevicesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voice-onboarding".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8710,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub start_path: String,
    pub negotiation_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub close_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            start_path: "/api/conversation/start".to_string(),
            negotiation_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            close_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub speaking_tolerance_secs: f64,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            sample_rate: session.sample_rate,
            block_size: session.block_size,
            speaking_tolerance_secs: session.speaking_tolerance_secs,
            echo_cancellation: session.echo_cancellation,
            noise_suppression: session.noise_suppression,
        }
    }
}

/// WAV files standing in for the microphone and speaker
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("fixtures/microphone.wav"),
            output_path: PathBuf::from("recordings/agent.wav"),
        }
    }
}

impl Config {
    /// Load from `path` (extension optional, file may be absent) and apply
    /// environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        settings
            .try_deserialize()
            .with_context(|| format!("Invalid config {}", path))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            sample_rate: self.audio.sample_rate,
            block_size: self.audio.block_size,
            speaking_tolerance_secs: self.audio.speaking_tolerance_secs,
            echo_cancellation: self.audio.echo_cancellation,
            noise_suppression: self.audio.noise_suppression,
            negotiation_timeout: Duration::from_millis(self.backend.negotiation_timeout_ms),
            connect_timeout: Duration::from_millis(self.backend.connect_timeout_ms),
            close_timeout: Duration::from_millis(self.backend.close_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[backend]\nbase_url = \"https://api.example.com\"\n\n[audio]\nspeaking_tolerance_secs = 0.25"
        )
        .unwrap();

        let cfg = Config::load(file.path().to_str().unwrap()).unwrap();

        assert_eq!(cfg.backend.base_url, "https://api.example.com");
        assert_eq!(cfg.backend.start_path, "/api/conversation/start");
        assert_eq!(cfg.service.http.port, 8710);

        let session = cfg.session_config();
        assert_eq!(session.speaking_tolerance_secs, 0.25);
        assert_eq!(session.sample_rate, 16000);
        assert_eq!(session.negotiation_timeout, Duration::from_secs(10));
        assert_eq!(session.close_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = Config::load("config/does-not-exist").unwrap();
        assert_eq!(cfg.service.name, "voice-onboarding");
        assert_eq!(cfg.audio.block_size, 4096);
    }
}
