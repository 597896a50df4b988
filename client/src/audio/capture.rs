use async_channel::Sender;
use cpal::traits::DeviceTrait;
use cpal::SampleFormat;
use finchvoice_sdk::voice::{FrameAccumulator, SAMPLE_RATE};
use finchvoice_sdk::{AudioFrame, CaptureDevice, TransportError};
use tracing::{error, info, warn};

use super::device::{find_device, stream_config, Direction};
use super::resampler::RateConverter;
use super::samples::{adjust_volume, i16_to_f32, stereo_to_mono, u16_to_f32};
use super::stream_thread::StreamThread;
use super::AudioError;

/// Turns mono device-rate callback buffers into 20 ms frames at 48 kHz.
pub struct CaptureChain {
    converter: RateConverter,
    accumulator: FrameAccumulator,
    gain: f32,
}

impl CaptureChain {
    /// # Errors
    /// Returns [`AudioError::ResamplerInit`] if `device_rate` cannot be
    /// converted to 48 kHz.
    pub fn new(device_rate: u32, gain: f32) -> Result<Self, AudioError> {
        Ok(Self {
            converter: RateConverter::new(device_rate, SAMPLE_RATE)?,
            accumulator: FrameAccumulator::new(),
            gain,
        })
    }

    pub fn process(&mut self, mono: &[f32]) -> Vec<AudioFrame> {
        match self.converter.process(mono) {
            Ok(mut samples) => {
                adjust_volume(&mut samples, self.gain);
                self.accumulator.push(&samples);
            }
            Err(e) => warn!("Dropping captured audio: {}", e),
        }

        std::iter::from_fn(|| self.accumulator.next_frame()).collect()
    }
}

/// Microphone capture through cpal.
pub struct CpalCapture {
    device_name: Option<String>,
    gain: f32,
    stream: Option<StreamThread>,
}

impl CpalCapture {
    #[must_use]
    pub fn new(device_name: Option<String>, gain: f32) -> Self {
        Self {
            device_name,
            gain,
            stream: None,
        }
    }

    fn open(&self, frames: Sender<AudioFrame>) -> Result<StreamThread, AudioError> {
        let device_name = self.device_name.clone();
        let gain = self.gain;

        let (thread, ()) = StreamThread::spawn("finchvoice-capture", move || {
            let device = find_device(Direction::Input, device_name.as_deref())?;
            let (config, format) = stream_config(&device, Direction::Input)?;
            let channels = config.channels;
            let mut chain = CaptureChain::new(config.sample_rate.0, gain)?;
            let mut dropped: u64 = 0;

            // Never block the audio callback; a full queue drops the frame.
            let mut deliver = move |mono: Vec<f32>| {
                for frame in chain.process(&mono) {
                    if frames.try_send(frame).is_err() {
                        dropped += 1;
                        if dropped % 100 == 1 {
                            warn!("Capture queue full, dropped frames (count={})", dropped);
                        }
                    }
                }
            };
            let err_fn = |e| error!("Input stream error: {}", e);

            let stream = match format {
                SampleFormat::F32 => device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| deliver(stereo_to_mono(data, channels)),
                    err_fn,
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        deliver(stereo_to_mono(&i16_to_f32(data), channels));
                    },
                    err_fn,
                    None,
                ),
                SampleFormat::U16 => device.build_input_stream(
                    &config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        deliver(stereo_to_mono(&u16_to_f32(data), channels));
                    },
                    err_fn,
                    None,
                ),
                other => return Err(AudioError::Config(format!("Unsupported sample format: {:?}", other))),
            }
            .map_err(|e| AudioError::Stream(e.to_string()))?;

            Ok((stream, ()))
        })?;

        Ok(thread)
    }
}

impl CaptureDevice for CpalCapture {
    fn start(&mut self, frames: Sender<AudioFrame>) -> Result<(), TransportError> {
        self.stream = None;
        let thread = self.open(frames).map_err(|e| TransportError::Device(e.to_string()))?;
        self.stream = Some(thread);
        info!("Capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            info!("Capture stopped");
        }
    }
}
