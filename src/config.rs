//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Platform variables (HOST, PORT, TRANSCRIPTION_API_KEY, ALLOWED_ORIGINS)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (HOST, PORT, TRANSCRIPTION_API_KEY, ALLOWED_ORIGINS)
//! 2. Environment variables (APP_SERVER__PORT, APP_AUDIO__FLUSH_INTERVAL_MS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Immutability:
//! The loaded configuration is wrapped in an `Arc` by the caller and handed to every
//! WebSocket session when it is constructed. Nothing mutates it after startup.

use crate::audio::wav::WavFormat;
use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Rust Concepts:
/// - **#[derive(...)]**: Automatically implements common traits:
///   - `Debug`: Allows printing with {:?} for debugging
///   - `Clone`: Allows making copies of the struct
///   - `Serialize`/`Deserialize`: Conversion to and from TOML, env vars, JSON
///
/// ## Why separate config structs:
/// Each section maps to one concern (HTTP server, cross-origin policy, the cloud
/// transcription API, audio batching, per-connection session timing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    pub transcription: TranscriptionConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
    /// Seconds the server waits for open connections to finish on shutdown
    pub shutdown_timeout_secs: u64,
}

/// Cross-origin policy.
///
/// The list must be non-empty; startup fails otherwise. A single `"*"` entry
/// allows any origin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Cloud transcription API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Secret sent in the `authorization` header. Sessions refuse to start without it.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL of the API, without a trailing slash
    pub base_url: String,
    /// Language hint submitted with every job
    pub language_code: String,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub request_timeout_secs: u64,
}

/// Audio format and batching settings.
///
/// ## Format:
/// Clients stream raw little-endian PCM; the format is fixed, not negotiated.
/// The defaults describe 16 kHz, 16-bit, mono audio.
///
/// ## Bounds:
/// - `max_buffer_bytes`: cap on audio held between flushes (oldest bytes are discarded)
/// - `max_pending_batches`: cap on batches waiting for the transcription worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub flush_interval_ms: u64,
    pub tick_interval_ms: u64,
    pub max_buffer_bytes: usize,
    pub max_pending_batches: usize,
}

/// Per-connection timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    /// How long a closing session waits for queued batches to finish
    pub shutdown_grace_ms: u64,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start with nothing but an API key
/// and an origin list. The origin list deliberately has no default.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,
                shutdown_timeout_secs: 30,
            },
            cors: CorsConfig {
                allowed_origins: Vec::new(),
            },
            transcription: TranscriptionConfig {
                api_key: None,
                base_url: "https://api.assemblyai.com/v2".to_string(),
                language_code: "en".to_string(),
                poll_interval_ms: 1000,
                max_poll_attempts: 120,
                request_timeout_secs: 30,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                channels: 1,
                bits_per_sample: 16,
                flush_interval_ms: 3000,        // One batch every 3 seconds
                tick_interval_ms: 250,
                max_buffer_bytes: 16000 * 2 * 30,  // 30 seconds of 16 kHz mono 16-bit audio
                max_pending_batches: 4,
            },
            session: SessionConfig {
                heartbeat_interval_secs: 15,
                client_timeout_secs: 60,
                shutdown_grace_ms: 10_000,
            },
        }
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_AUDIO__FLUSH_INTERVAL_MS=5000`: Override batch interval
    /// - `APP_TRANSCRIPTION__LANGUAGE_CODE=de`: Override language hint
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    /// - `TRANSCRIPTION_API_KEY=...`: The transcription API secret
    /// - `ALLOWED_ORIGINS=https://a.example,https://b.example`: Comma-separated origin list
    /// - `APP_CORS__ALLOWED_ORIGINS=https://a.example,https://b.example`: Same, prefixed form
    pub fn load() -> Result<Self> {
        // non-UTF-8 variables cannot name a setting; skip them
        let vars = env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        Self::load_from(vars)
    }

    /// Same as [`AppConfig::load`], reading variables from `vars` instead of the process
    /// environment.
    fn load_from(vars: config::Map<String, String>) -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists)
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            // Example: APP_SERVER__PORT becomes server.port in the config
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .source(Some(vars.clone())),
            );

        // Handle special environment variables used by deployment platforms
        if let Some(host) = vars.get("HOST") {
            settings = settings.set_override("server.host", host.as_str())?;
        }

        if let Some(port) = vars.get("PORT") {
            settings = settings.set_override("server.port", port.as_str())?;
        }

        if let Some(api_key) = vars.get("TRANSCRIPTION_API_KEY") {
            settings = settings.set_override("transcription.api_key", api_key.as_str())?;
        }

        if let Some(origins) = vars.get("ALLOWED_ORIGINS") {
            settings = settings.set_override("cors.allowed_origins", parse_origin_list(origins))?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - At least one allowed origin, none of them blank
    /// - Audio format and batching values are usable
    /// - Polling values are non-zero
    ///
    /// A missing API key is not a startup error; each session reports it to its client.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(anyhow::anyhow!(
                "At least one allowed origin must be configured (cors.allowed_origins or ALLOWED_ORIGINS)"
            ));
        }

        if self.cors.allowed_origins.iter().any(|o| o.trim().is_empty()) {
            return Err(anyhow::anyhow!("Allowed origins cannot contain blank entries"));
        }

        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Sample rate and channel count must be greater than 0"));
        }

        if self.audio.bits_per_sample == 0 || self.audio.bits_per_sample % 8 != 0 {
            return Err(anyhow::anyhow!(
                "Bits per sample must be a positive multiple of 8, got {}",
                self.audio.bits_per_sample
            ));
        }

        if self.audio.flush_interval_ms == 0 || self.audio.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("Flush and tick intervals must be greater than 0"));
        }

        if self.audio.max_buffer_bytes == 0 {
            return Err(anyhow::anyhow!("Audio buffer cap must be greater than 0"));
        }

        if self.audio.max_pending_batches == 0 {
            return Err(anyhow::anyhow!("Max pending batches must be greater than 0"));
        }

        if self.transcription.poll_interval_ms == 0 || self.transcription.max_poll_attempts == 0 {
            return Err(anyhow::anyhow!("Poll interval and poll attempts must be greater than 0"));
        }

        Ok(())  // All validation passed
    }

    /// Whether the transcription secret is present and non-blank.
    pub fn has_api_key(&self) -> bool {
        self.transcription
            .api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

impl CorsConfig {
    /// Whether a browser `Origin` header value is allowed.
    pub fn allows(&self, origin: &str) -> bool {
        self.allows_any()
            || self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.trim_end_matches('/') == origin.trim_end_matches('/'))
    }

    pub fn allows_any(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl AudioConfig {
    pub fn wav_format(&self) -> WavFormat {
        WavFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl TranscriptionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Split a comma-separated origin list, dropping empty entries.
fn parse_origin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tests for the configuration module.
#[cfg(test)]
mod tests {
    use super::*;  // Import everything from the parent module

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.cors.allowed_origins = vec!["http://localhost:3000".to_string()];
        config
    }

    /// The defaults are complete except for the origin list.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.flush_interval_ms, 3000);
        assert_eq!(config.audio.sample_rate, 16000);
        assert!(config.transcription.api_key.is_none());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_empty_origin_list_fails_fast() {
        let config = AppConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("allowed origin"));

        let mut blank = valid_config();
        blank.cors.allowed_origins.push("   ".to_string());
        assert!(blank.validate().is_err());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = valid_config();
        config.server.port = 0;  // Invalid port
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.audio.bits_per_sample = 12;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.audio.max_pending_batches = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.transcription.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_presence() {
        let mut config = valid_config();
        assert!(!config.has_api_key());
        config.transcription.api_key = Some("  ".to_string());
        assert!(!config.has_api_key());
        config.transcription.api_key = Some("secret".to_string());
        assert!(config.has_api_key());
    }

    #[test]
    fn test_origin_matching() {
        let cors = CorsConfig {
            allowed_origins: vec!["https://app.example.com/".to_string()],
        };
        assert!(cors.allows("https://app.example.com"));
        assert!(!cors.allows("https://evil.example.com"));
        assert!(!cors.allows_any());

        let wildcard = CorsConfig {
            allowed_origins: vec!["*".to_string()],
        };
        assert!(wildcard.allows("https://anything.example"));
    }

    #[test]
    fn test_parse_origin_list() {
        assert_eq!(
            parse_origin_list(" https://a.example, ,https://b.example "),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(parse_origin_list("").is_empty());
    }

    fn vars(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_load_prefixed_origin_list() {
        let config = AppConfig::load_from(vars(&[
            ("APP_CORS__ALLOWED_ORIGINS", "http://localhost:3000,https://app.example.com"),
            ("APP_AUDIO__FLUSH_INTERVAL_MS", "5000"),
        ]))
        .unwrap();

        assert_eq!(
            config.cors.allowed_origins,
            vec![
                "http://localhost:3000".to_string(),
                "https://app.example.com".to_string()
            ]
        );
        assert_eq!(config.audio.flush_interval_ms, 5000);
        assert!(config.validate().is_ok());

        let single = AppConfig::load_from(vars(&[(
            "APP_CORS__ALLOWED_ORIGINS",
            "http://localhost:3000",
        )]))
        .unwrap();
        assert_eq!(single.cors.allowed_origins, vec!["http://localhost:3000".to_string()]);
    }

    #[test]
    fn test_load_platform_overrides() {
        let config = AppConfig::load_from(vars(&[
            ("PORT", "3000"),
            ("TRANSCRIPTION_API_KEY", "secret"),
            ("ALLOWED_ORIGINS", "https://a.example, https://b.example"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 3000);
        assert!(config.has_api_key());
        assert_eq!(config.cors.allowed_origins.len(), 2);
    }

    #[test]
    fn test_load_without_origins_fails_validation() {
        let config = AppConfig::load_from(vars(&[])).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wav_format_from_audio_config() {
        let format = AppConfig::default().audio.wav_format();
        assert_eq!(format.sample_rate, 16000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.bits_per_sample, 16);
    }
}
