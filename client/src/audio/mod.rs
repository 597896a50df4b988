pub mod capture;
pub mod device;
pub mod playback;
pub mod resampler;
pub mod samples;
mod stream_thread;

use thiserror::Error;

pub use capture::{CaptureChain, CpalCapture};
pub use device::{list_input_devices, list_output_devices};
pub use playback::{CpalPlayback, PlayoutBuffer};
pub use resampler::RateConverter;

#[derive(Debug, Clone, Error)]
pub enum AudioError {
    #[error("No {0} device found")]
    NoDevice(String),

    #[error("Device configuration error: {0}")]
    Config(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Resampler initialization error: {0}")]
    ResamplerInit(String),

    #[error("Resampling error: {0}")]
    Resampling(String),
}
