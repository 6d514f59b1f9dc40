//! Input device enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};

use crate::audio::source::DeviceSelector;
use crate::error::CaptureError;

/// Description of an input device for listing
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all input devices of the default host
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let Ok(devices) = host.input_devices() else {
        return Vec::new();
    };

    devices
        .enumerate()
        .filter_map(|(index, device)| {
            let name = device.name().ok()?;
            let (sample_rates, channels) = get_device_capabilities(&device);
            Some(AudioDeviceInfo {
                index,
                is_default: default_name.as_ref() == Some(&name),
                name,
                sample_rates,
                channels,
            })
        })
        .collect()
}

/// Supported common sample rates and channel counts
fn get_device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_input_configs() {
        for config in configs {
            for rate_val in [8000u32, 16000, 22050, 44100, 48000, 96000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !sample_rates.contains(&rate_val)
                {
                    sample_rates.push(rate_val);
                }
            }

            let ch = config.channels();
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
    }

    sample_rates.sort();
    channels.sort();

    (sample_rates, channels)
}

/// Resolve a selector to a cpal input device
pub fn select_input_device(selector: &DeviceSelector) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();

    if *selector == DeviceSelector::Default {
        return host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceNotFound("No default input device".to_string()));
    }

    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceNotFound(e.to_string()))?;

    for (index, device) in devices.enumerate() {
        if let Ok(name) = device.name() {
            if selector.matches(index, &name) {
                tracing::info!("Selected input device {}: {}", index, name);
                return Ok(device);
            }
        }
    }

    Err(CaptureError::DeviceNotFound(format!("{:?}", selector)))
}
