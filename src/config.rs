//! Server configuration
//!
//! Values are read once at startup from a TOML file (optional) and then
//! overridden by command line flags. The resulting [`ServerConfig`] is
//! immutable for the lifetime of the process.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::audio::DeviceSelector;
use crate::constants::*;
use crate::error::Error;

/// Top-level server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    pub bind_address: IpAddr,
    /// TCP port for audio streaming
    pub port: u16,
    /// Bytes of PCM per capture read
    pub chunk_size: usize,
    pub sample_rate: u32,
    /// Channel count used when a client does not declare one
    pub default_channels: u16,
    /// Password clients must send before streaming starts
    pub password: Option<String>,
    /// Encode each chunk with Opus before framing
    pub compression: bool,
    pub opus: OpusConfig,
    /// Which input device to capture from
    pub device: DeviceSelector,
    /// Backoff after a transient capture failure, in milliseconds
    pub capture_retry_ms: u64,
    /// How long shutdown waits for live sessions, in milliseconds
    pub shutdown_grace_ms: u64,
    pub handshake: HandshakeConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_TCP_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            default_channels: DEFAULT_CHANNELS,
            password: None,
            compression: false,
            opus: OpusConfig::default(),
            device: DeviceSelector::Default,
            capture_retry_ms: CAPTURE_RETRY_BACKOFF.as_millis() as u64,
            shutdown_grace_ms: 2000,
            handshake: HandshakeConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Default location of the config file, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "wifi-audio-link").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from an explicit path; a missing file is an error
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load_or_default() -> Result<Self, Error> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let mut config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.normalize();
        Ok(config)
    }

    /// Treat an empty password as no password
    pub fn normalize(&mut self) {
        if self.password.as_deref().is_some_and(str::is_empty) {
            self.password = None;
        }
    }

    /// Check invariants the streaming path relies on
    pub fn validate(&self) -> Result<(), Error> {
        if self.chunk_size == 0 || self.chunk_size % BYTES_PER_SAMPLE != 0 {
            return Err(Error::Config(format!(
                "chunk_size must be a positive multiple of {} bytes, got {}",
                BYTES_PER_SAMPLE, self.chunk_size
            )));
        }
        if self.chunk_size < BYTES_PER_SAMPLE * MAX_CHANNELS as usize {
            return Err(Error::Config(format!(
                "chunk_size {} cannot hold one frame of {} channels",
                self.chunk_size, MAX_CHANNELS
            )));
        }
        if self.chunk_size > MAX_FRAME_PAYLOAD {
            return Err(Error::Config(format!(
                "chunk_size {} exceeds the maximum frame payload of {} bytes",
                self.chunk_size, MAX_FRAME_PAYLOAD
            )));
        }
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        if self.default_channels == 0 || self.default_channels > MAX_CHANNELS {
            return Err(Error::Config(format!(
                "default_channels must be between 1 and {}",
                MAX_CHANNELS
            )));
        }
        if self.handshake.greeting_bytes == 0 || self.handshake.password_bytes == 0 {
            return Err(Error::Config("handshake read bounds must be positive".into()));
        }
        if self.discovery.interval_ms == 0 {
            return Err(Error::Config("discovery.interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn capture_retry(&self) -> Duration {
        Duration::from_millis(self.capture_retry_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Duration of one capture chunk for the given channel count
    pub fn chunk_duration(&self, channels: u16) -> Duration {
        let frames = self.chunk_size / (BYTES_PER_SAMPLE * channels.max(1) as usize);
        Duration::from_micros(frames as u64 * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

/// Bounds applied to the connection handshake
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub greeting_bytes: usize,
    pub greeting_timeout_ms: u64,
    pub password_bytes: usize,
    pub password_timeout_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            greeting_bytes: GREETING_MAX_BYTES,
            greeting_timeout_ms: 300,
            password_bytes: PASSWORD_MAX_BYTES,
            password_timeout_ms: 5000,
        }
    }
}

impl HandshakeConfig {
    pub fn greeting_timeout(&self) -> Duration {
        Duration::from_millis(self.greeting_timeout_ms)
    }

    pub fn password_timeout(&self) -> Duration {
        Duration::from_millis(self.password_timeout_ms)
    }
}

/// Discovery broadcast settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// UDP port the advertisement is sent to
    pub port: u16,
    pub interval_ms: u64,
    /// Advertised server name
    pub name: String,
    pub broadcast_address: IpAddr,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_DISCOVERY_PORT,
            interval_ms: DEFAULT_DISCOVERY_INTERVAL.as_millis() as u64,
            name: DEFAULT_SERVER_NAME.to_string(),
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Opus encoder settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpusConfig {
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Variable bitrate
    pub vbr: bool,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            bitrate: 64_000,
            vbr: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 8765);
        assert_eq!(config.discovery.port, 8766);
        assert_eq!(config.default_channels, 1);
        assert!(config.password.is_none());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ServerConfig::from_toml(
            r#"
            port = 9000
            password = "secret"
            compression = true

            [discovery]
            name = "Studio"
            interval_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert!(config.compression);
        assert_eq!(config.discovery.name, "Studio");
        assert_eq!(config.discovery.interval(), Duration::from_millis(500));
        assert_eq!(config.discovery.port, 8766);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_device_selector_from_toml() {
        let config = ServerConfig::from_toml("device = { name = \"CABLE\" }").unwrap();
        assert_eq!(config.device, DeviceSelector::Name("CABLE".into()));

        let config = ServerConfig::from_toml("device = { index = 3 }").unwrap();
        assert_eq!(config.device, DeviceSelector::Index(3));
    }

    #[test]
    fn test_empty_password_is_none() {
        let config = ServerConfig::from_toml("password = \"\"").unwrap();
        assert!(config.password.is_none());
    }

    #[test]
    fn test_validate_rejects_oversized_chunk() {
        let config = ServerConfig {
            chunk_size: 70_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_odd_chunk() {
        let config = ServerConfig {
            chunk_size: 501,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_chunk_below_one_frame() {
        let config = ServerConfig {
            chunk_size: 14,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            chunk_size: 16,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunk_duration() {
        let config = ServerConfig::default();
        assert_eq!(config.chunk_duration(1), Duration::from_millis(20));
        assert_eq!(config.chunk_duration(2), Duration::from_millis(10));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            ServerConfig::from_toml("port = \"not a number\""),
            Err(Error::Config(_))
        ));
    }
}
