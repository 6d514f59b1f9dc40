//! Wire protocol
//!
//! ## TCP stream
//!
//! ```text
//! client                                   server
//!   │  CHANNELS:<n>          (optional)       │
//!   │ ───────────────────────────────────────▶│
//!   │  <password>            (if configured)  │
//!   │ ───────────────────────────────────────▶│
//!   │  OK | DENIED           (if configured)  │
//!   │ ◀───────────────────────────────────────│
//!   │  [len:u16 BE][payload] ...              │
//!   │ ◀───────────────────────────────────────│
//! ```
//!
//! ## UDP discovery
//!
//! A single datagram `name;tcp_port;password` (password empty when unset).

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::{MAX_CHANNELS, MAX_FRAME_PAYLOAD};
use crate::error::NetworkError;

/// Tag preceding the requested channel count
pub const CHANNELS_TAG: &[u8] = b"CHANNELS:";

/// Reply sent after a matching password
pub const AUTH_OK: &[u8] = b"OK";

/// Reply sent after a mismatching password
pub const AUTH_DENIED: &[u8] = b"DENIED";

/// Size of the frame length prefix
pub const FRAME_HEADER_LEN: usize = 2;

/// Build a frame: 2-byte big-endian length followed by the payload
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, NetworkError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(NetworkError::PayloadTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Split one complete frame off the front of `buf`.
///
/// Returns `None` until the whole frame is buffered.
pub fn decode_frame(buf: &mut BytesMut) -> Option<Bytes> {
    if buf.len() < FRAME_HEADER_LEN {
        return None;
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < FRAME_HEADER_LEN + len {
        return None;
    }
    let mut frame = buf.split_to(FRAME_HEADER_LEN + len);
    let _ = frame.split_to(FRAME_HEADER_LEN);
    Some(frame.freeze())
}

/// Read one frame payload from a stream
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|_| NetworkError::ConnectionClosed)?;

    let len = u16::from_be_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|_| NetworkError::ConnectionClosed)?;
    Ok(Bytes::from(payload))
}

/// Parse a `CHANNELS:<n>` greeting.
///
/// Returns the channel count and whatever follows it, or `None` when the
/// greeting is not a valid declaration. Nothing separates the count from a
/// password sent right after it, so the count is the longest digit prefix
/// within `1..=MAX_CHANNELS` and the remaining bytes (leading whitespace
/// stripped) are returned as the start of the credential.
pub fn parse_channel_request(greeting: &[u8]) -> Option<(u16, &[u8])> {
    let rest = greeting.strip_prefix(CHANNELS_TAG)?;
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();

    (1..=digits).rev().find_map(|len| {
        let (number, tail) = rest.split_at(len);
        let channels: u16 = std::str::from_utf8(number).ok()?.parse().ok()?;
        (1..=MAX_CHANNELS)
            .contains(&channels)
            .then(|| (channels, tail.trim_ascii_start()))
    })
}

/// Server identity broadcast for zero-configuration discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryAdvertisement {
    pub name: String,
    pub tcp_port: u16,
    pub password: Option<String>,
}

impl DiscoveryAdvertisement {
    pub fn new(name: impl Into<String>, tcp_port: u16, password: Option<String>) -> Self {
        Self {
            name: name.into(),
            tcp_port,
            password,
        }
    }

    /// Serialize as `name;tcp_port;password`
    pub fn to_payload(&self) -> Bytes {
        Bytes::from(self.to_string())
    }

    /// Parse a received advertisement. The password field may be absent.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?;
        let mut parts = text.splitn(3, ';');
        let name = parts.next()?;
        let tcp_port = parts.next()?.trim().parse().ok()?;
        let password = parts.next().filter(|p| !p.is_empty()).map(str::to_string);
        Some(Self::new(name, tcp_port, password))
    }
}

impl fmt::Display for DiscoveryAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{}",
            self.name,
            self.tcp_port,
            self.password.as_deref().unwrap_or("")
        )
    }
}
