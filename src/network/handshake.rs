//! Connection handshake
//!
//! Runs once per accepted connection, before any audio is sent:
//!
//! 1. Read a short greeting within the greeting window. `CHANNELS:<n>`
//!    selects the channel count; anything else (or silence) keeps the
//!    default. Bytes after the count belong to the credential, since a
//!    password written right after the declaration often lands in the same
//!    read.
//! 2. If a password is configured, read the credential, compare it, and
//!    answer `OK` or `DENIED`. A greeting that was not a channel
//!    declaration is taken as the start of the credential, so clients that
//!    send the password straight away still authenticate.
//!
//! Every read is bounded in size and time.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::HandshakeConfig;
use crate::error::HandshakeError;
use crate::protocol::{parse_channel_request, AUTH_DENIED, AUTH_OK, CHANNELS_TAG};

/// Authorization state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// Sent the configured password
    Authorized,
    /// Sent a wrong password
    Denied,
    /// No password is configured
    NotRequired,
}

impl Authorization {
    /// Whether the connection may receive audio
    pub fn permits_streaming(self) -> bool {
        !matches!(self, Authorization::Denied)
    }
}

/// Result of a completed handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeOutcome {
    pub channels: u16,
    pub authorization: Authorization,
}

/// Negotiate channel count and authorization on a fresh connection
pub async fn perform_handshake<S>(
    stream: &mut S,
    config: &HandshakeConfig,
    default_channels: u16,
    password: Option<&str>,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = match timeout(
        config.greeting_timeout(),
        read_bounded(stream, config.greeting_bytes),
    )
    .await
    {
        Ok(read) => read?,
        Err(_) => Vec::new(),
    };

    let (channels, mut credential) = match parse_channel_request(&greeting) {
        Some((channels, rest)) => (channels, rest.to_vec()),
        None if greeting.starts_with(CHANNELS_TAG) => {
            tracing::debug!("Malformed channel declaration, using {} channel(s)", default_channels);
            let rest = &greeting[CHANNELS_TAG.len()..];
            let rest = &rest[rest.iter().take_while(|b| b.is_ascii_digit()).count()..];
            (default_channels, rest.trim_ascii_start().to_vec())
        }
        None => (default_channels, greeting.clone()),
    };

    let Some(password) = password else {
        return Ok(HandshakeOutcome {
            channels,
            authorization: Authorization::NotRequired,
        });
    };

    if credential.is_empty() {
        credential = timeout(
            config.password_timeout(),
            read_bounded(stream, config.password_bytes),
        )
        .await
        .map_err(|_| HandshakeError::Timeout)??;

        if credential.is_empty() {
            return Err(HandshakeError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
    } else if greeting.len() == config.greeting_bytes && credential.len() < config.password_bytes {
        // The greeting filled its buffer, so the credential may continue
        let remaining = config.password_bytes - credential.len();
        if let Ok(more) = timeout(config.greeting_timeout(), read_bounded(stream, remaining)).await {
            credential.extend_from_slice(&more?);
        }
    }

    if credential.trim_ascii() == password.as_bytes() {
        stream.write_all(AUTH_OK).await?;
        stream.flush().await?;
        Ok(HandshakeOutcome {
            channels,
            authorization: Authorization::Authorized,
        })
    } else {
        let _ = stream.write_all(AUTH_DENIED).await;
        let _ = stream.flush().await;
        Ok(HandshakeOutcome {
            channels,
            authorization: Authorization::Denied,
        })
    }
}

/// One read of at most `max` bytes
async fn read_bounded<S>(stream: &mut S, max: usize) -> std::io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; max];
    let n = stream.read(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}
