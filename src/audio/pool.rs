//! Shared capture streams
//!
//! At most one capture handle is open per channel count. Sessions that need
//! the same channel count hold a [`CaptureLease`] on the same stream. Reads
//! are serialized by a mutex and fan out by sequence number: a reader that
//! has not yet seen the newest chunk gets it without touching the device,
//! otherwise it reads the next chunk from the device for everyone. Each
//! session therefore sees chunks in capture order, and a session that falls
//! behind skips ahead to the newest chunk.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::audio::source::{CaptureHandle, CaptureSource};
use crate::constants::BYTES_PER_SAMPLE;
use crate::error::CaptureError;

/// Opens and shares capture streams keyed by channel count
pub struct CapturePool {
    source: Arc<dyn CaptureSource>,
    sample_rate: u32,
    chunk_size: usize,
    captures: Mutex<HashMap<u16, Weak<SharedCapture>>>,
}

impl CapturePool {
    pub fn new(source: Arc<dyn CaptureSource>, sample_rate: u32, chunk_size: usize) -> Self {
        Self {
            source,
            sample_rate,
            chunk_size,
            captures: Mutex::new(HashMap::new()),
        }
    }

    /// Get a lease on the stream for `channels`, opening it if needed
    pub async fn acquire(self: &Arc<Self>, channels: u16) -> Result<CaptureLease, CaptureError> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.acquire_blocking(channels))
            .await
            .map_err(|e| CaptureError::StreamError(e.to_string()))?
    }

    fn acquire_blocking(&self, channels: u16) -> Result<CaptureLease, CaptureError> {
        // The map lock is held across open so two sessions cannot open the
        // same channel count concurrently.
        let mut captures = self.captures.lock();
        captures.retain(|_, weak| weak.strong_count() > 0);

        let shared = match captures.get(&channels).and_then(Weak::upgrade) {
            Some(shared) => shared,
            None => {
                let chunk_size = self.chunk_size_for(channels)?;
                let handle = self.source.open(channels, self.sample_rate, chunk_size)?;
                let shared = Arc::new(SharedCapture::new(channels, handle));
                captures.insert(channels, Arc::downgrade(&shared));
                shared
            }
        };

        let last_seen = shared.state.lock().sequence;
        Ok(CaptureLease { shared, last_seen })
    }

    /// Configured chunk size rounded down to whole interleaved sample frames
    fn chunk_size_for(&self, channels: u16) -> Result<usize, CaptureError> {
        let frame_bytes = BYTES_PER_SAMPLE * channels as usize;
        let chunk_size = self.chunk_size - self.chunk_size % frame_bytes;
        if chunk_size == 0 {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{} byte chunks cannot hold one {}-channel frame",
                self.chunk_size, channels
            )));
        }
        Ok(chunk_size)
    }

    /// Number of capture streams currently open
    pub fn open_count(&self) -> usize {
        self.captures
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|shared| shared.state.lock().handle.is_some())
            .count()
    }

    /// Close every open stream. Outstanding leases see `CaptureError::Closed`.
    pub fn close_all(&self) {
        let mut captures = self.captures.lock();
        for shared in captures.drain().filter_map(|(_, weak)| weak.upgrade()) {
            shared.close();
        }
    }
}

/// One open capture stream shared by every session with its channel count
struct SharedCapture {
    channels: u16,
    state: Mutex<SharedState>,
}

struct SharedState {
    handle: Option<Box<dyn CaptureHandle>>,
    /// Number of chunks read from the device so far
    sequence: u64,
    latest: Option<Bytes>,
}

impl SharedCapture {
    fn new(channels: u16, handle: Box<dyn CaptureHandle>) -> Self {
        Self {
            channels,
            state: Mutex::new(SharedState {
                handle: Some(handle),
                sequence: 0,
                latest: None,
            }),
        }
    }

    /// Return the first chunk newer than `last_seen`
    fn read_after(&self, last_seen: u64) -> Result<(u64, Bytes), CaptureError> {
        let mut state = self.state.lock();

        if state.sequence > last_seen {
            if let Some(latest) = &state.latest {
                return Ok((state.sequence, latest.clone()));
            }
        }

        let handle = state.handle.as_mut().ok_or(CaptureError::Closed)?;
        let chunk = handle.read()?;
        state.sequence += 1;
        state.latest = Some(chunk.clone());
        Ok((state.sequence, chunk))
    }

    fn close(&self) {
        if self.state.lock().handle.take().is_some() {
            tracing::info!("Closed capture stream for {} channel(s)", self.channels);
        }
    }
}

impl Drop for SharedCapture {
    fn drop(&mut self) {
        if self.state.get_mut().handle.is_some() {
            tracing::info!("Released capture stream for {} channel(s)", self.channels);
        }
    }
}

/// A session's claim on a shared capture stream
pub struct CaptureLease {
    shared: Arc<SharedCapture>,
    last_seen: u64,
}

impl CaptureLease {
    pub fn channels(&self) -> u16 {
        self.shared.channels
    }

    /// Read the next chunk for this session
    pub async fn read(&mut self) -> Result<Bytes, CaptureError> {
        let shared = self.shared.clone();
        let last_seen = self.last_seen;
        let (sequence, chunk) = tokio::task::spawn_blocking(move || shared.read_after(last_seen))
            .await
            .map_err(|e| CaptureError::StreamError(e.to_string()))??;
        self.last_seen = sequence;
        Ok(chunk)
    }
}
