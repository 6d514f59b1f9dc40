//! Audio capture subsystem

pub mod pool;
pub mod source;

#[cfg(feature = "capture")]
pub mod capture;
#[cfg(feature = "capture")]
pub mod device;

pub use pool::{CaptureLease, CapturePool};
pub use source::{CaptureHandle, CaptureSource, DeviceSelector};

#[cfg(feature = "capture")]
pub use capture::CpalCaptureSource;
#[cfg(feature = "capture")]
pub use device::{list_input_devices, select_input_device, AudioDeviceInfo};
