use std::collections::VecDeque;

use async_channel::{bounded, Receiver, Sender};
use cpal::traits::DeviceTrait;
use cpal::SampleFormat;
use finchvoice_sdk::voice::SAMPLE_RATE;
use finchvoice_sdk::{AudioFrame, PlaybackDevice};
use tracing::{debug, error, info, warn};

use super::device::{find_device, stream_config, Direction};
use super::resampler::RateConverter;
use super::samples::{adjust_volume, mono_to_multichannel_f32, mono_to_multichannel_i16, mono_to_multichannel_u16};
use super::stream_thread::StreamThread;
use super::AudioError;

/// Decoded buffers waiting for the output callback, about 500 ms at 20 ms each.
const PLAYOUT_QUEUE_CAPACITY: usize = 25;

/// Bridges whole decoded buffers to the output callback's arbitrary sizes.
/// Missing samples are played as silence.
#[derive(Debug, Default)]
pub struct PlayoutBuffer {
    pending: VecDeque<f32>,
    underruns: u64,
}

impl PlayoutBuffer {
    pub fn fill(&mut self, queue: &Receiver<Vec<f32>>, out: &mut [f32]) {
        while self.pending.len() < out.len() {
            match queue.try_recv() {
                Ok(samples) => self.pending.extend(samples),
                Err(_) => break,
            }
        }

        let available = self.pending.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..available)) {
            *slot = sample;
        }
        if available < out.len() {
            out[available..].fill(0.0);
            // An empty buffer is idle, not an underrun.
            if available > 0 {
                self.underruns += 1;
            }
        }
    }

    #[must_use]
    pub fn underruns(&self) -> u64 {
        self.underruns
    }
}

/// Speaker output through cpal. Frames are resampled to the device rate on
/// the caller's side; the callback only copies.
pub struct CpalPlayback {
    queue: Sender<Vec<f32>>,
    converter: RateConverter,
    volume: f32,
    dropped: u64,
    _stream: StreamThread,
}

impl CpalPlayback {
    /// # Errors
    /// Returns [`AudioError`] if the device cannot be opened or its rate
    /// cannot be converted from 48 kHz.
    pub fn open(device_name: Option<String>, volume: f32) -> Result<Self, AudioError> {
        let (queue_tx, queue_rx) = bounded::<Vec<f32>>(PLAYOUT_QUEUE_CAPACITY);

        let (stream, device_rate) = StreamThread::spawn("finchvoice-playback", move || {
            let device = find_device(Direction::Output, device_name.as_deref())?;
            let (config, format) = stream_config(&device, Direction::Output)?;
            let channels = usize::from(config.channels);
            let mut buffer = PlayoutBuffer::default();
            let mut mono = Vec::new();
            let err_fn = |e| error!("Output stream error: {}", e);

            let stream = match format {
                SampleFormat::F32 => device.build_output_stream(
                    &config,
                    move |output: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        mono.resize(output.len() / channels, 0.0);
                        buffer.fill(&queue_rx, &mut mono);
                        mono_to_multichannel_f32(&mono, output, channels);
                    },
                    err_fn,
                    None,
                ),
                SampleFormat::I16 => device.build_output_stream(
                    &config,
                    move |output: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        mono.resize(output.len() / channels, 0.0);
                        buffer.fill(&queue_rx, &mut mono);
                        mono_to_multichannel_i16(&mono, output, channels);
                    },
                    err_fn,
                    None,
                ),
                SampleFormat::U16 => device.build_output_stream(
                    &config,
                    move |output: &mut [u16], _: &cpal::OutputCallbackInfo| {
                        mono.resize(output.len() / channels, 0.0);
                        buffer.fill(&queue_rx, &mut mono);
                        mono_to_multichannel_u16(&mono, output, channels);
                    },
                    err_fn,
                    None,
                ),
                other => return Err(AudioError::Config(format!("Unsupported output format: {:?}", other))),
            }
            .map_err(|e| AudioError::Stream(e.to_string()))?;

            Ok((stream, config.sample_rate.0))
        })?;

        info!("Playback started at {} Hz", device_rate);
        Ok(Self {
            queue: queue_tx,
            converter: RateConverter::new(SAMPLE_RATE, device_rate)?,
            volume,
            dropped: 0,
            _stream: stream,
        })
    }
}

impl PlaybackDevice for CpalPlayback {
    fn schedule(&mut self, frame: AudioFrame) {
        let mut samples = match self.converter.process(frame.samples()) {
            Ok(samples) if samples.is_empty() => return,
            Ok(samples) => samples,
            Err(e) => {
                debug!("Dropping frame for playback: {}", e);
                return;
            }
        };
        adjust_volume(&mut samples, self.volume);

        if self.queue.try_send(samples).is_err() {
            self.dropped += 1;
            if self.dropped % 100 == 1 {
                warn!("Playback queue full, dropped frames (count={})", self.dropped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_across_buffer_boundaries() {
        let (tx, rx) = bounded(4);
        tx.try_send(vec![0.1; 6]).unwrap();
        tx.try_send(vec![0.2; 6]).unwrap();

        let mut buffer = PlayoutBuffer::default();
        let mut out = [0.0f32; 8];
        buffer.fill(&rx, &mut out);
        assert_eq!(&out[..6], &[0.1; 6]);
        assert_eq!(&out[6..], &[0.2; 2]);

        let mut out = [1.0f32; 8];
        buffer.fill(&rx, &mut out);
        assert_eq!(&out[..4], &[0.2; 4]);
        assert_eq!(&out[4..], &[0.0; 4]);
        assert_eq!(buffer.underruns(), 1);
    }

    #[test]
    fn empty_queue_plays_silence() {
        let (_tx, rx) = bounded::<Vec<f32>>(1);
        let mut buffer = PlayoutBuffer::default();
        let mut out = [0.5f32; 4];
        buffer.fill(&rx, &mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(buffer.underruns(), 0);
    }
}
