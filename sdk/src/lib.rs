//! Voice call client: chat gateway signaling, voice gateway handshake and an
//! encrypted RTP media transport driven by pluggable codec and audio devices.

pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod network;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::CallConfig;
pub use error::{CodecError, CryptoError, HandshakeError, SdkError, SignalingError, TransportError};
pub use models::{VoiceCredentials, VoiceSessionParameters};
pub use session::{CallEnded, CallMedia, CallSession, CallState};
pub use transport::{CountersSnapshot, MediaSocket, MediaTransport, SocketLayer};
pub use voice::{AudioFrame, CaptureDevice, FrameDecoder, FrameEncoder, PlaybackDevice};
