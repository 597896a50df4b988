use opus::Channels;

use crate::error::CodecError;
use crate::voice::frame::{AudioFrame, SAMPLE_RATE};

/// 120 ms at 48 kHz, the longest duration a single Opus packet may carry.
const MAX_DECODED_SAMPLES: usize = 5760;

/// Expands compressed frames for the receive path.
pub trait FrameDecoder: Send + 'static {
    /// # Errors
    /// Returns [`CodecError`]; the caller drops the packet and carries on.
    fn decode(&mut self, payload: &[u8]) -> Result<AudioFrame, CodecError>;
}

pub struct OpusFrameDecoder {
    decoder: opus::Decoder,
    buffer: Vec<f32>,
}

impl OpusFrameDecoder {
    /// # Errors
    /// Returns [`CodecError::Initialization`] if libopus fails to allocate.
    pub fn new() -> Result<Self, CodecError> {
        let decoder = opus::Decoder::new(SAMPLE_RATE, Channels::Mono)
            .map_err(|e| CodecError::Initialization(e.to_string()))?;

        Ok(Self {
            decoder,
            buffer: vec![0.0; MAX_DECODED_SAMPLES],
        })
    }
}

impl FrameDecoder for OpusFrameDecoder {
    /// Packets that do not decode to exactly one 20 ms frame are rejected.
    fn decode(&mut self, payload: &[u8]) -> Result<AudioFrame, CodecError> {
        let samples = self
            .decoder
            .decode_float(payload, &mut self.buffer, false)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        AudioFrame::new(self.buffer[..samples].to_vec())
    }
}
