pub mod decoder;
pub mod device;
pub mod encoder;
pub mod frame;

pub use decoder::{FrameDecoder, OpusFrameDecoder};
pub use device::{CaptureDevice, PlaybackDevice};
pub use encoder::{FrameEncoder, OpusFrameEncoder};
pub use frame::{AudioFrame, FrameAccumulator, FRAME_SAMPLES, SAMPLE_RATE};
