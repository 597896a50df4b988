use crate::error::CodecError;

pub const SAMPLE_RATE: u32 = 48_000;

/// Samples per 20 ms mono frame at [`SAMPLE_RATE`].
pub const FRAME_SAMPLES: usize = 960;

/// One 20 ms mono frame of `f32` samples in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame(Vec<f32>);

impl AudioFrame {
    /// # Errors
    /// Returns [`CodecError::FrameLength`] unless `samples` holds exactly
    /// [`FRAME_SAMPLES`] values.
    pub fn new(samples: Vec<f32>) -> Result<Self, CodecError> {
        if samples.len() != FRAME_SAMPLES {
            return Err(CodecError::FrameLength {
                expected: FRAME_SAMPLES,
                got: samples.len(),
            });
        }
        Ok(Self(samples))
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.0
    }
}

/// Collects arbitrarily sized chunks of mono samples into whole frames.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buffer: Vec<f32>,
}

impl FrameAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_SAMPLES * 2),
        }
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);
    }

    /// Drain the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.buffer.len() < FRAME_SAMPLES {
            return None;
        }
        let frame: Vec<f32> = self.buffer.drain(0..FRAME_SAMPLES).collect();
        Some(AudioFrame(frame))
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
