use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};
use finchvoice_sdk::voice::SAMPLE_RATE;
use tracing::{debug, info};

use super::AudioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// Find the named device, or the host default when `name` is `None`.
pub fn find_device(direction: Direction, name: Option<&str>) -> Result<Device, AudioError> {
    let host = cpal::default_host();

    let device = match name {
        Some(name) => {
            let mut devices = match direction {
                Direction::Input => host.input_devices(),
                Direction::Output => host.output_devices(),
            }
            .map_err(|e| AudioError::Config(e.to_string()))?;
            devices.find(|d| d.name().is_ok_and(|n| n == name))
        }
        None => match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        },
    }
    .ok_or_else(|| AudioError::NoDevice(name.unwrap_or(direction.label()).to_string()))?;

    info!(
        "Selected {} device: {}",
        direction.label(),
        device.name().unwrap_or_else(|_| "unknown".to_string())
    );
    Ok(device)
}

/// Pick a stream config in this order:
/// 1. 48000 Hz + F32
/// 2. 48000 Hz + I16
/// 3. 48000 Hz + U16
/// 4. Any Hz + F32
/// 5. First available config
pub fn find_best_stream_config(
    configs: &[SupportedStreamConfigRange],
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let first = configs
        .first()
        .ok_or_else(|| AudioError::Config("No configurations found".to_string()))?;

    let target = SampleRate(SAMPLE_RATE);
    let priorities = [
        (Some(target), SampleFormat::F32),
        (Some(target), SampleFormat::I16),
        (Some(target), SampleFormat::U16),
        (None, SampleFormat::F32),
    ];

    for (rate, format) in priorities {
        for config in configs.iter().filter(|c| c.sample_format() == format) {
            match rate {
                Some(rate) if config.min_sample_rate() <= rate && config.max_sample_rate() >= rate => {
                    return Ok((config.with_sample_rate(rate).into(), format));
                }
                Some(_) => {}
                None => return Ok((config.with_max_sample_rate().into(), format)),
            }
        }
    }

    Ok((first.with_max_sample_rate().into(), first.sample_format()))
}

pub fn stream_config(device: &Device, direction: Direction) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let configs: Vec<_> = match direction {
        Direction::Input => device.supported_input_configs().map(Iterator::collect),
        Direction::Output => device.supported_output_configs().map(Iterator::collect),
    }
    .map_err(|e| AudioError::Config(e.to_string()))?;

    for config in &configs {
        debug!(
            "Supported: {} ch, {}-{} Hz, {:?}",
            config.channels(),
            config.min_sample_rate().0,
            config.max_sample_rate().0,
            config.sample_format()
        );
    }

    let (config, format) = find_best_stream_config(&configs)?;
    info!(
        "Selected {} config: {} ch, {} Hz, {:?}",
        direction.label(),
        config.channels,
        config.sample_rate.0,
        format
    );
    Ok((config, format))
}

/// # Errors
/// Returns [`AudioError::Config`] if the host cannot enumerate devices.
pub fn list_input_devices() -> Result<Vec<String>, AudioError> {
    let devices = cpal::default_host()
        .input_devices()
        .map_err(|e| AudioError::Config(e.to_string()))?;
    Ok(devices.map(|d| d.name().unwrap_or_else(|_| "unknown".to_string())).collect())
}

/// # Errors
/// Returns [`AudioError::Config`] if the host cannot enumerate devices.
pub fn list_output_devices() -> Result<Vec<String>, AudioError> {
    let devices = cpal::default_host()
        .output_devices()
        .map_err(|e| AudioError::Config(e.to_string()))?;
    Ok(devices.map(|d| d.name().unwrap_or_else(|_| "unknown".to_string())).collect())
}
