//! In-crate capture source and encoder with scripted behaviour

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::audio::{CaptureHandle, CaptureSource};
use crate::codec::{EncoderFactory, FrameEncoder};
use crate::error::{CaptureError, CodecError};

/// Produces chunks whose bytes all equal the chunk's index (mod 256)
pub struct ScriptedSource {
    opened: Mutex<Vec<u16>>,
    reads: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    failing_attempts: usize,
    pace: Duration,
    fail_open: bool,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            reads: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
            failing_attempts: 0,
            pace: Duration::ZERO,
            fail_open: false,
        }
    }

    /// The first `n` read attempts fail with a transient error
    pub fn fail_first_reads(mut self, n: usize) -> Self {
        self.failing_attempts = n;
        self
    }

    /// Sleep this long in every read, like a real device
    pub fn paced(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Channel counts passed to `open`, in order
    pub fn opened_channels(&self) -> Vec<u16> {
        self.opened.lock().clone()
    }

    /// Successful reads across every handle
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Read attempts across every handle, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl CaptureSource for ScriptedSource {
    fn open(
        &self,
        channels: u16,
        _sample_rate: u32,
        chunk_size: usize,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        if self.fail_open {
            return Err(CaptureError::DeviceNotFound("scripted".into()));
        }
        self.opened.lock().push(channels);
        Ok(Box::new(ScriptedHandle {
            channels,
            chunk_size,
            next: 0,
            reads: self.reads.clone(),
            attempts: self.attempts.clone(),
            failing_attempts: self.failing_attempts,
            pace: self.pace,
        }))
    }
}

struct ScriptedHandle {
    channels: u16,
    chunk_size: usize,
    next: u8,
    reads: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    failing_attempts: usize,
    pace: Duration,
}

impl CaptureHandle for ScriptedHandle {
    fn read(&mut self) -> Result<Bytes, CaptureError> {
        if !self.pace.is_zero() {
            std::thread::sleep(self.pace);
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failing_attempts {
            return Err(CaptureError::Timeout);
        }

        let chunk = Bytes::from(vec![self.next; self.chunk_size]);
        self.next = self.next.wrapping_add(1);
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(chunk)
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

/// "Compresses" by keeping the first half of the chunk; fails on the
/// listed call indices
pub struct ScriptedEncoder {
    calls: usize,
    fail_on: HashSet<usize>,
}

impl ScriptedEncoder {
    pub fn new(fail_on: Vec<usize>) -> Self {
        Self {
            calls: 0,
            fail_on: fail_on.into_iter().collect(),
        }
    }
}

impl FrameEncoder for ScriptedEncoder {
    fn encode(&mut self, pcm: &[u8]) -> Result<Bytes, CodecError> {
        let call = self.calls;
        self.calls += 1;
        if self.fail_on.contains(&call) {
            return Err(CodecError::EncodingFailed(format!("scripted failure {}", call)));
        }
        Ok(Bytes::copy_from_slice(&pcm[..pcm.len() / 2]))
    }
}

/// Hands out [`ScriptedEncoder`]s and records the requested channel counts
pub struct ScriptedEncoderFactory {
    fail_on: Vec<usize>,
    reject_channels: Option<u16>,
    created: Mutex<Vec<u16>>,
}

impl ScriptedEncoderFactory {
    pub fn new(fail_on: Vec<usize>) -> Self {
        Self {
            fail_on,
            reject_channels: None,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Refuse to build encoders for this channel count
    pub fn rejecting(mut self, channels: u16) -> Self {
        self.reject_channels = Some(channels);
        self
    }

    pub fn created(&self) -> Vec<u16> {
        self.created.lock().clone()
    }
}

impl EncoderFactory for ScriptedEncoderFactory {
    fn create(&self, _sample_rate: u32, channels: u16) -> Result<Box<dyn FrameEncoder>, CodecError> {
        if self.reject_channels == Some(channels) {
            return Err(CodecError::EncoderInit(format!(
                "Unsupported channel count: {}",
                channels
            )));
        }
        self.created.lock().push(channels);
        Ok(Box::new(ScriptedEncoder::new(self.fail_on.clone())))
    }
}
