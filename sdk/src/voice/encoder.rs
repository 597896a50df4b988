use opus::{Application, Bitrate, Channels};

use crate::error::CodecError;
use crate::voice::frame::{AudioFrame, SAMPLE_RATE};

/// Largest Opus packet we ever produce.
const MAX_PACKET_SIZE: usize = 4000;

/// Compresses PCM frames for the send path.
pub trait FrameEncoder: Send + 'static {
    /// # Errors
    /// Returns [`CodecError`]; the caller drops the frame and carries on.
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, CodecError>;
}

/// 48 kHz mono Opus encoder tuned for voice at a constant bitrate.
pub struct OpusFrameEncoder {
    encoder: opus::Encoder,
    buffer: Vec<u8>,
}

impl OpusFrameEncoder {
    /// # Errors
    /// Returns [`CodecError::Initialization`] if libopus rejects the settings.
    pub fn new(bitrate: i32) -> Result<Self, CodecError> {
        let mut encoder = opus::Encoder::new(SAMPLE_RATE, Channels::Mono, Application::Voip)
            .map_err(|e| CodecError::Initialization(e.to_string()))?;

        encoder
            .set_bitrate(Bitrate::Bits(bitrate))
            .map_err(|e| CodecError::Initialization(e.to_string()))?;
        encoder
            .set_vbr(false)
            .map_err(|e| CodecError::Initialization(e.to_string()))?;

        Ok(Self {
            encoder,
            buffer: vec![0u8; MAX_PACKET_SIZE],
        })
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, CodecError> {
        let size = self
            .encoder
            .encode_float(frame.samples(), &mut self.buffer)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(self.buffer[..size].to_vec())
    }
}
