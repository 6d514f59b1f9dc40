//! Capture source abstraction
//!
//! The server only needs fixed-size PCM chunks. Anything that can open a
//! stream for a channel count and hand back chunks can drive it, which keeps
//! the streaming path independent of the audio backend.

use bytes::Bytes;
use serde::Deserialize;

use crate::error::CaptureError;

/// Opens capture streams
pub trait CaptureSource: Send + Sync {
    /// Open a stream producing `chunk_size` bytes of interleaved 16-bit
    /// little-endian PCM per read.
    fn open(
        &self,
        channels: u16,
        sample_rate: u32,
        chunk_size: usize,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// An open capture stream. Dropping the handle closes it.
pub trait CaptureHandle: Send {
    /// Block until one chunk is available.
    ///
    /// Transient faults (underruns, device hiccups) are reported as errors
    /// for which [`CaptureError::is_transient`] holds; the caller retries.
    fn read(&mut self) -> Result<Bytes, CaptureError>;

    fn channels(&self) -> u16;
}

/// Chooses the input device to capture from
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelector {
    /// The host's default input device
    #[default]
    Default,
    /// Position in the host's input device list
    Index(usize),
    /// First input device whose name contains this text
    Name(String),
}

impl DeviceSelector {
    /// Whether a device at `index` named `name` satisfies this selector
    pub fn matches(&self, index: usize, name: &str) -> bool {
        match self {
            DeviceSelector::Default => false,
            DeviceSelector::Index(i) => *i == index,
            DeviceSelector::Name(needle) => name.contains(needle.as_str()),
        }
    }
}

impl std::str::FromStr for DeviceSelector {
    type Err = std::convert::Infallible;

    /// `default`, a bare index, or a name fragment
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.eq_ignore_ascii_case("default") {
            Ok(DeviceSelector::Default)
        } else if let Ok(index) = s.parse() {
            Ok(DeviceSelector::Index(index))
        } else {
            Ok(DeviceSelector::Name(s.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parse() {
        assert_eq!("default".parse::<DeviceSelector>().unwrap(), DeviceSelector::Default);
        assert_eq!("2".parse::<DeviceSelector>().unwrap(), DeviceSelector::Index(2));
        assert_eq!(
            "CABLE Input".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Name("CABLE Input".into())
        );
    }

    #[test]
    fn test_selector_matches() {
        let by_name = DeviceSelector::Name("CABLE".into());
        assert!(by_name.matches(0, "CABLE Input (VB-Audio)"));
        assert!(!by_name.matches(0, "Built-in Microphone"));

        let by_index = DeviceSelector::Index(1);
        assert!(by_index.matches(1, "anything"));
        assert!(!by_index.matches(0, "anything"));
    }
}
