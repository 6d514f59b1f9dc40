//! Frame encoding
//!
//! Optional compression applied to each captured chunk before framing,
//! with an explicit fallback to the raw chunk when encoding fails.

pub mod encoder;

pub use encoder::{EncoderFactory, FrameEncoder, Payload};

#[cfg(feature = "opus")]
pub use encoder::{OpusEncoderFactory, OpusFrameEncoder};
