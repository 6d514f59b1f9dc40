//! Frame encoders
//!
//! A session owns one [`FrameEncoder`] built by an [`EncoderFactory`]. The
//! Opus implementation wraps the `opus` crate; any other codec can be
//! plugged in through the same traits.

use bytes::Bytes;

use crate::error::CodecError;

/// Transforms one raw PCM chunk into a compressed payload
pub trait FrameEncoder: Send {
    /// Encode interleaved 16-bit little-endian PCM
    fn encode(&mut self, pcm: &[u8]) -> Result<Bytes, CodecError>;
}

/// Builds per-session encoders
pub trait EncoderFactory: Send + Sync {
    fn create(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn FrameEncoder>, CodecError>;
}

/// What actually goes on the wire for one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// The captured PCM, unmodified
    Raw(Bytes),
    /// Output of the session's encoder
    Encoded(Bytes),
}

impl Payload {
    /// Encode `pcm` if an encoder is present.
    ///
    /// An encode failure yields the raw chunk together with the error, so
    /// the caller can log it and still send audio for this iteration.
    pub fn encode_or_raw<E: FrameEncoder + ?Sized>(
        encoder: Option<&mut E>,
        pcm: Bytes,
    ) -> (Self, Option<CodecError>) {
        match encoder {
            None => (Payload::Raw(pcm), None),
            Some(encoder) => match encoder.encode(&pcm) {
                Ok(encoded) => (Payload::Encoded(encoded), None),
                Err(e) => (Payload::Raw(pcm), Some(e)),
            },
        }
    }

    pub fn bytes(&self) -> &Bytes {
        match self {
            Payload::Raw(bytes) | Payload::Encoded(bytes) => bytes,
        }
    }

    pub fn is_encoded(&self) -> bool {
        matches!(self, Payload::Encoded(_))
    }
}

#[cfg(feature = "opus")]
pub use self::opus_impl::{OpusEncoderFactory, OpusFrameEncoder};

#[cfg(feature = "opus")]
mod opus_impl {
    use bytes::Bytes;
    use opus::{Application, Channels, Encoder};

    use super::{EncoderFactory, FrameEncoder};
    use crate::config::OpusConfig;
    use crate::constants::BYTES_PER_SAMPLE;
    use crate::error::CodecError;

    /// Largest packet libopus will produce for one frame
    const MAX_PACKET_SIZE: usize = 4000;

    /// Opus encoder wrapper for 16-bit PCM chunks
    pub struct OpusFrameEncoder {
        encoder: Encoder,
        sample_rate: u32,
        channels: u16,
        /// PCM decode scratch (reused to avoid allocations)
        samples: Vec<i16>,
        /// Encoding buffer (reused to avoid allocations)
        encode_buffer: Vec<u8>,
        frames_encoded: u64,
        bytes_produced: u64,
    }

    impl OpusFrameEncoder {
        pub fn new(sample_rate: u32, channels: u16, config: &OpusConfig) -> Result<Self, CodecError> {
            let opus_channels = match channels {
                1 => Channels::Mono,
                2 => Channels::Stereo,
                _ => {
                    return Err(CodecError::EncoderInit(format!(
                        "Unsupported channel count: {}",
                        channels
                    )))
                }
            };

            let mut encoder = Encoder::new(sample_rate, opus_channels, Application::Audio)
                .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

            encoder
                .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;
            encoder
                .set_vbr(config.vbr)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

            Ok(Self {
                encoder,
                sample_rate,
                channels,
                samples: Vec::new(),
                encode_buffer: vec![0u8; MAX_PACKET_SIZE],
                frames_encoded: 0,
                bytes_produced: 0,
            })
        }

        /// Whether `frames` samples per channel is a legal Opus frame
        /// (2.5, 5, 10, 20, 40 or 60 ms)
        pub fn is_valid_frame_size(&self, frames: usize) -> bool {
            let per_2_5_ms = self.sample_rate as usize / 400;
            [1, 2, 4, 8, 16, 24].iter().any(|m| frames == per_2_5_ms * m)
        }

        pub fn frames_encoded(&self) -> u64 {
            self.frames_encoded
        }

        pub fn bytes_produced(&self) -> u64 {
            self.bytes_produced
        }
    }

    impl FrameEncoder for OpusFrameEncoder {
        fn encode(&mut self, pcm: &[u8]) -> Result<Bytes, CodecError> {
            let frame_bytes = BYTES_PER_SAMPLE * self.channels as usize;
            if pcm.len() % frame_bytes != 0 || !self.is_valid_frame_size(pcm.len() / frame_bytes) {
                return Err(CodecError::InvalidFrameSize(pcm.len()));
            }

            self.samples.clear();
            self.samples.extend(
                pcm.chunks_exact(BYTES_PER_SAMPLE)
                    .map(|b| i16::from_le_bytes([b[0], b[1]])),
            );

            let size = self
                .encoder
                .encode(&self.samples, &mut self.encode_buffer)
                .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

            self.frames_encoded += 1;
            self.bytes_produced += size as u64;

            Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
        }
    }

    /// Builds an [`OpusFrameEncoder`] per session
    pub struct OpusEncoderFactory {
        config: OpusConfig,
    }

    impl OpusEncoderFactory {
        pub fn new(config: OpusConfig) -> Self {
            Self { config }
        }
    }

    impl EncoderFactory for OpusEncoderFactory {
        fn create(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn FrameEncoder>, CodecError> {
            Ok(Box::new(OpusFrameEncoder::new(sample_rate, channels, &self.config)?))
        }
    }

}
