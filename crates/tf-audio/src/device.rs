//! Output device and stream configuration selection

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleFormat, SupportedStreamConfig};

use crate::{AudioError, AudioResult};

/// Rate used when the device will not report a usable default
pub const FALLBACK_SAMPLE_RATE: u32 = 44100;

/// Default output device of the default host
pub fn default_output_device() -> AudioResult<Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::NoDevice)
}

/// Pick an f32 output configuration, preferring the device's native default
/// rate and falling back to 44.1 kHz.
pub fn pick_output_config(device: &Device) -> AudioResult<SupportedStreamConfig> {
    if let Ok(default) = device.default_output_config() {
        if default.sample_format() == SampleFormat::F32 {
            return Ok(default);
        }
        // Keep the native rate, switch the format.
        let rate = default.sample_rate();
        if let Ok(configs) = device.supported_output_configs() {
            for config in configs {
                if config.sample_format() == SampleFormat::F32
                    && config.min_sample_rate() <= rate
                    && config.max_sample_rate() >= rate
                {
                    return Ok(config.with_sample_rate(rate));
                }
            }
        }
    }

    let fallback: cpal::SampleRate = FALLBACK_SAMPLE_RATE;
    let configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;
    for config in configs {
        if config.sample_format() == SampleFormat::F32
            && config.min_sample_rate() <= fallback
            && config.max_sample_rate() >= fallback
        {
            return Ok(config.with_sample_rate(fallback));
        }
    }

    Err(AudioError::ConfigError(
        "no f32 output configuration".into(),
    ))
}
