use async_channel::Sender;

use crate::error::TransportError;
use crate::voice::frame::AudioFrame;

/// Microphone side of a call.
///
/// `start` hands the device a sender; from then on it delivers one
/// [`AudioFrame`] every 20 ms until `stop` is called. Devices should use
/// `try_send` from real-time callbacks and drop frames when the queue is full.
pub trait CaptureDevice: Send + 'static {
    /// # Errors
    /// Returns [`TransportError::Device`] if the device cannot be opened.
    fn start(&mut self, frames: Sender<AudioFrame>) -> Result<(), TransportError>;

    fn stop(&mut self);
}

/// Speaker side of a call.
pub trait PlaybackDevice: Send + 'static {
    /// Queue a decoded frame for output. Must not block.
    fn schedule(&mut self, frame: AudioFrame);
}
