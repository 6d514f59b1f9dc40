//! # WiFi Audio Link
//!
//! Relays a live capture device to TCP clients as length-prefixed frames and
//! advertises the server on the LAN over UDP broadcast.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               SERVER                                  │
//! │                                                                       │
//! │  ┌────────────────┐        ┌──────────────────────────────────────┐  │
//! │  │ Capture Device │──────▶ │  Capture Pool (audio::pool)          │  │
//! │  └────────────────┘        │  one shared handle per channel count │  │
//! │                            └───────┬───────────────────┬──────────┘  │
//! │                                    │                   │             │
//! │                                    ▼                   ▼             │
//! │  ┌───────────────┐         ┌──────────────┐    ┌──────────────┐      │
//! │  │ Listener      │──spawn─▶│ Session 1    │    │ Session 2    │ ...  │
//! │  │ (accept loop) │         │ handshake    │    │ handshake    │      │
//! │  └───────┬───────┘         │ encode/frame │    │ encode/frame │      │
//! │          │                 └──────┬───────┘    └──────┬───────┘      │
//! │          ▼                        │                   │              │
//! │  ┌───────────────┐                │ [len:u16][data]   │              │
//! │  │ Registry      │                ▼                   ▼              │
//! │  └───────────────┘            TCP client          TCP client         │
//! │                                                                       │
//! │  ┌──────────────────────┐                                             │
//! │  │ Discovery (UDP)      │──▶  "name;port;password" every interval     │
//! │  └──────────────────────┘                                             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default TCP port for the audio stream
    pub const DEFAULT_TCP_PORT: u16 = 8765;

    /// Default UDP port for discovery broadcasts
    pub const DEFAULT_DISCOVERY_PORT: u16 = 8766;

    /// Default sample rate for capture
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count when a client does not ask for one (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Highest channel count a client may request
    pub const MAX_CHANNELS: u16 = 8;

    /// Default capture chunk in bytes (20 ms of 16-bit mono at 48 kHz)
    pub const DEFAULT_CHUNK_SIZE: usize = 1920;

    /// Bytes per PCM sample (signed 16-bit little-endian)
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Largest payload the u16 length prefix can describe
    pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

    /// Default advertised server name
    pub const DEFAULT_SERVER_NAME: &str = "WiFiAudioLink";

    /// Default interval between discovery broadcasts
    pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(2);

    /// Backoff after a transient capture failure
    pub const CAPTURE_RETRY_BACKOFF: Duration = Duration::from_millis(10);

    /// Pause after a failed accept before trying again
    pub const ACCEPT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

    /// Maximum greeting bytes read during the handshake
    pub const GREETING_MAX_BYTES: usize = 16;

    /// Maximum credential bytes read during the handshake
    pub const PASSWORD_MAX_BYTES: usize = 128;
}
