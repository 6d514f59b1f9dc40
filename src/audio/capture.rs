//! cpal-backed capture source
//!
//! Each open handle runs its cpal input stream on a dedicated thread (cpal
//! streams are not `Send` on every host). The stream callback converts the
//! f32 samples to 16-bit little-endian PCM and hands them to the reader
//! over a bounded channel; the reader slices them into fixed-size chunks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Sample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use crate::audio::device::select_input_device;
use crate::audio::source::{CaptureHandle, CaptureSource, DeviceSelector};
use crate::constants::BYTES_PER_SAMPLE;
use crate::error::CaptureError;

/// Blocks buffered between the stream callback and the reader
const BLOCK_QUEUE_CAPACITY: usize = 64;

/// Longest a read waits for the device before reporting a timeout
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Opens cpal input streams on the selected device
pub struct CpalCaptureSource {
    selector: DeviceSelector,
}

impl CpalCaptureSource {
    /// Create a source, failing if the selected device does not exist
    pub fn new(selector: DeviceSelector) -> Result<Self, CaptureError> {
        select_input_device(&selector)?;
        Ok(Self { selector })
    }
}

impl CaptureSource for CpalCaptureSource {
    fn open(
        &self,
        channels: u16,
        sample_rate: u32,
        chunk_size: usize,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let handle = CpalCaptureHandle::open(&self.selector, channels, sample_rate, chunk_size)?;
        Ok(Box::new(handle))
    }
}

/// An open cpal input stream
pub struct CpalCaptureHandle {
    channels: u16,
    chunk_size: usize,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    block_rx: Receiver<Vec<u8>>,
    error_rx: Receiver<CaptureError>,
    pending: BytesMut,
    /// Blocks dropped because the reader fell behind
    dropped_blocks: Arc<AtomicU64>,
}

impl CpalCaptureHandle {
    fn open(
        selector: &DeviceSelector,
        channels: u16,
        sample_rate: u32,
        chunk_size: usize,
    ) -> Result<Self, CaptureError> {
        let device = select_input_device(selector)?;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (block_tx, block_rx) = bounded::<Vec<u8>>(BLOCK_QUEUE_CAPACITY);
        let (error_tx, error_rx) = bounded::<CaptureError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), CaptureError>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let dropped_blocks = Arc::new(AtomicU64::new(0));
        let dropped = dropped_blocks.clone();

        let thread_handle = thread::Builder::new()
            .name(format!("capture-{}ch", channels))
            .spawn(move || {
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mut block = Vec::with_capacity(data.len() * BYTES_PER_SAMPLE);
                        for sample in data {
                            let pcm: i16 = sample.to_sample();
                            block.extend_from_slice(&pcm.to_le_bytes());
                        }
                        if block_tx.try_send(block).is_err() {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(CaptureError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(CaptureError::UnsupportedFormat(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| CaptureError::StreamError(e.to_string()))?;

        let mut handle = Self {
            channels,
            chunk_size,
            running,
            thread_handle: Some(thread_handle),
            block_rx,
            error_rx,
            pending: BytesMut::with_capacity(chunk_size * 2),
            dropped_blocks,
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(
                    "Capture stream opened: {} channel(s), {} Hz, {} byte chunks",
                    channels,
                    sample_rate,
                    chunk_size
                );
                Ok(handle)
            }
            Ok(Err(e)) => {
                handle.stop();
                Err(e)
            }
            Err(_) => {
                handle.stop();
                Err(CaptureError::StreamError("capture thread exited".into()))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Blocks dropped because the reader fell behind
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::Relaxed)
    }
}

impl CaptureHandle for CpalCaptureHandle {
    fn read(&mut self) -> Result<Bytes, CaptureError> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }

        while self.pending.len() < self.chunk_size {
            match self.block_rx.recv_timeout(READ_TIMEOUT) {
                Ok(block) => self.pending.extend_from_slice(&block),
                Err(RecvTimeoutError::Timeout) => return Err(CaptureError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Closed),
            }
        }

        Ok(self.pending.split_to(self.chunk_size).freeze())
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for CpalCaptureHandle {
    fn drop(&mut self) {
        self.stop();
        tracing::info!(
            "Capture stream closed: {} channel(s), {} blocks dropped",
            self.channels,
            self.dropped_blocks()
        );
    }
}
