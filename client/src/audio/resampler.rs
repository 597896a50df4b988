use rubato::{FftFixedIn, Resampler};

use super::AudioError;

/// FFT resampler over fixed-size mono chunks.
pub struct AudioResampler {
    resampler: FftFixedIn<f32>,

    /// Reused across calls so the audio callback does not allocate per chunk.
    output_buffer: Vec<Vec<f32>>,
}

impl AudioResampler {
    /// # Arguments
    /// * `source_sample_rate` - Input audio sample rate
    /// * `target_sample_rate` - Output audio sample rate
    /// * `chunk_size` - Input samples consumed per call
    ///
    /// # Errors
    /// Returns [`AudioError::ResamplerInit`] for rates rubato cannot convert.
    pub fn new(source_sample_rate: u32, target_sample_rate: u32, chunk_size: usize) -> Result<Self, AudioError> {
        let resampler = FftFixedIn::<f32>::new(
            source_sample_rate as usize,
            target_sample_rate as usize,
            chunk_size,
            2, // sub_chunks (quality/performance balance)
            1, // mono channel
        )
        .map_err(|e| AudioError::ResamplerInit(format!("Failed to create resampler: {}", e)))?;

        let output_buffer = resampler.output_buffer_allocate(true);

        Ok(Self {
            resampler,
            output_buffer,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.resampler.input_frames_next()
    }

    /// Resample exactly one chunk.
    ///
    /// # Errors
    /// Returns [`AudioError::Resampling`] if `input` is not one chunk long.
    pub fn resample(&mut self, input: &[f32]) -> Result<Vec<f32>, AudioError> {
        let (_, resampled_size) = self
            .resampler
            .process_into_buffer(&[input], &mut self.output_buffer, None)
            .map_err(|e| AudioError::Resampling(format!("Resampling failed: {}", e)))?;

        Ok(self.output_buffer[0][..resampled_size].to_vec())
    }
}

/// Converts a stream of arbitrarily sized mono buffers between two rates.
/// Equal rates pass samples through untouched.
pub struct RateConverter {
    resampler: Option<AudioResampler>,
    pending: Vec<f32>,
}

impl RateConverter {
    /// # Errors
    /// Returns [`AudioError::ResamplerInit`] if the rates cannot be converted.
    pub fn new(source_sample_rate: u32, target_sample_rate: u32) -> Result<Self, AudioError> {
        let resampler = if source_sample_rate == target_sample_rate {
            None
        } else {
            // 20 ms of input per chunk.
            let chunk = (source_sample_rate / 50).max(1) as usize;
            Some(AudioResampler::new(source_sample_rate, target_sample_rate, chunk)?)
        };

        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Feed `input` and return every output sample that is ready. Input that
    /// does not fill a whole chunk is kept for the next call.
    ///
    /// # Errors
    /// Returns [`AudioError::Resampling`]; buffered input is discarded.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, AudioError> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend_from_slice(input);
        let chunk = resampler.chunk_size();
        let mut output = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk {
            match resampler.resample(&self.pending[consumed..consumed + chunk]) {
                Ok(samples) => output.extend(samples),
                Err(e) => {
                    self.pending.clear();
                    return Err(e);
                }
            }
            consumed += chunk;
        }
        self.pending.drain(..consumed);
        Ok(output)
    }
}
