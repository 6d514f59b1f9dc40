//! Streaming session
//!
//! One session per accepted connection. The session walks the per-connection
//! state machine:
//!
//! ```text
//! Accepted → Handshaking ─┬─▶ Authorized → Streaming ─▶ Closed
//!                         ├─▶ Denied ────────────────▶ Closed
//!                         └─▶ (timeout / error) ─────▶ Closed
//! ```
//!
//! Every exit path funnels into [`Session::close`], which shuts the
//! connection down, drops the registry entry and releases the capture
//! lease exactly once.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use uuid::Uuid;

use crate::audio::{CaptureLease, CapturePool};
use crate::codec::{EncoderFactory, FrameEncoder, Payload};
use crate::config::ServerConfig;
use crate::error::CaptureError;
use crate::network::handshake::{perform_handshake, Authorization};
use crate::network::registry::{Registration, SessionInfo, SessionRegistry};
use crate::protocol::encode_frame;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Handshaking,
    Authorized,
    Denied,
    Streaming,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Accepted => "accepted",
            SessionState::Handshaking => "handshaking",
            SessionState::Authorized => "authorized",
            SessionState::Denied => "denied",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Handshake timed out or failed on I/O
    HandshakeFailed,
    /// Wrong password
    Denied,
    /// The capture stream could not be opened or failed permanently
    CaptureFailed,
    /// Writing to the client failed
    Disconnected,
    /// The server is stopping
    Shutdown,
}

/// Final report of a finished session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub channels: Option<u16>,
    pub reason: CloseReason,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub encode_fallbacks: u64,
}

/// Everything a session shares with the server
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
    pub captures: Arc<CapturePool>,
    pub encoders: Option<Arc<dyn EncoderFactory>>,
    pub shutdown: watch::Receiver<bool>,
}

impl SessionContext {
    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Server side of one client connection
pub struct Session<S> {
    id: Uuid,
    peer: SocketAddr,
    stream: S,
    state: SessionState,
    channels: Option<u16>,
    ctx: SessionContext,
    registration: Option<Registration>,
    lease: Option<CaptureLease>,
    frames_sent: u64,
    bytes_sent: u64,
    encode_fallbacks: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: SocketAddr, ctx: SessionContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            stream,
            state: SessionState::Accepted,
            channels: None,
            ctx,
            registration: None,
            lease: None,
            frames_sent: 0,
            bytes_sent: 0,
            encode_fallbacks: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(session = %self.id, "{} -> {}", self.state, next);
        self.state = next;
    }

    /// Drive the session to completion
    pub async fn run(mut self) -> SessionSummary {
        let reason = self.drive().await;
        self.close(reason).await
    }

    async fn drive(&mut self) -> CloseReason {
        self.transition(SessionState::Handshaking);

        let config = self.ctx.config.clone();
        let outcome = match perform_handshake(
            &mut self.stream,
            &config.handshake,
            config.default_channels,
            config.password.as_deref(),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::info!(session = %self.id, peer = %self.peer, "Handshake failed: {}", e);
                return CloseReason::HandshakeFailed;
            }
        };

        self.channels = Some(outcome.channels);
        if !outcome.authorization.permits_streaming() {
            self.transition(SessionState::Denied);
            tracing::warn!(session = %self.id, peer = %self.peer, "Client denied (bad password)");
            return CloseReason::Denied;
        }
        self.transition(SessionState::Authorized);
        tracing::info!(
            session = %self.id,
            peer = %self.peer,
            "Client requested {} channel(s)",
            outcome.channels
        );

        let lease = match self.ctx.captures.acquire(outcome.channels).await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::error!(session = %self.id, "Failed to open capture: {}", e);
                return CloseReason::CaptureFailed;
            }
        };
        self.lease = Some(lease);

        self.registration = Some(self.ctx.registry.register(SessionInfo {
            id: self.id,
            peer: self.peer,
            channels: outcome.channels,
            authorization: outcome.authorization,
            connected_at: Utc::now(),
        }));

        let encoder = self.build_encoder(outcome.channels);

        self.transition(SessionState::Streaming);
        self.relay(encoder).await
    }

    fn build_encoder(&self, channels: u16) -> Option<Box<dyn FrameEncoder>> {
        if !self.ctx.config.compression {
            return None;
        }
        let factory = self.ctx.encoders.as_ref()?;
        match factory.create(self.ctx.config.sample_rate, channels) {
            Ok(encoder) => Some(encoder),
            Err(e) => {
                tracing::warn!(session = %self.id, "Encoder unavailable, streaming raw PCM: {}", e);
                None
            }
        }
    }

    /// Pull, encode, frame and write until something ends the session
    async fn relay(&mut self, mut encoder: Option<Box<dyn FrameEncoder>>) -> CloseReason {
        let retry = self.ctx.config.capture_retry();

        loop {
            if self.ctx.stopping() {
                return CloseReason::Shutdown;
            }

            let Some(lease) = self.lease.as_mut() else {
                return CloseReason::CaptureFailed;
            };
            let pcm = match lease.read().await {
                Ok(pcm) => pcm,
                Err(e) if e.is_transient() => {
                    self.back_off(&e, retry).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(session = %self.id, "Capture failed: {}", e);
                    return CloseReason::CaptureFailed;
                }
            };

            let (payload, encode_error) = Payload::encode_or_raw(encoder.as_deref_mut(), pcm);
            if let Some(e) = encode_error {
                self.encode_fallbacks += 1;
                if self.encode_fallbacks == 1 {
                    tracing::warn!(session = %self.id, "Encoding failed, sending raw PCM: {}", e);
                } else {
                    tracing::debug!(session = %self.id, "Encoding failed, sending raw PCM: {}", e);
                }
            }

            let frame = match encode_frame(payload.bytes()) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(session = %self.id, "Cannot frame payload: {}", e);
                    return CloseReason::CaptureFailed;
                }
            };

            if let Err(e) = self.stream.write_all(&frame).await {
                tracing::info!(session = %self.id, peer = %self.peer, "Client disconnected: {}", e);
                return CloseReason::Disconnected;
            }

            self.frames_sent += 1;
            self.bytes_sent += frame.len() as u64;
        }
    }

    async fn back_off(&self, error: &CaptureError, retry: Duration) {
        tracing::debug!(session = %self.id, "Capture read failed, retrying: {}", error);
        tokio::time::sleep(retry).await;
    }

    /// Terminal transition; runs once per session
    async fn close(mut self, reason: CloseReason) -> SessionSummary {
        let _ = self.stream.shutdown().await;
        drop(self.registration.take());
        drop(self.lease.take());
        self.transition(SessionState::Closed);

        tracing::info!(
            session = %self.id,
            peer = %self.peer,
            frames = self.frames_sent,
            "Session closed: {:?}",
            reason
        );

        SessionSummary {
            id: self.id,
            peer: self.peer,
            channels: self.channels,
            reason,
            frames_sent: self.frames_sent,
            bytes_sent: self.bytes_sent,
            encode_fallbacks: self.encode_fallbacks,
        }
    }
}
