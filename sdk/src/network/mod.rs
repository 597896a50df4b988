pub mod ip_discovery;
pub mod session_assembler;
pub mod signaling;
pub mod voice_gateway;
mod websocket;

pub use session_assembler::SessionAssembler;
pub use signaling::{SignalingClient, SignalingEvent, SignalingState};
pub use voice_gateway::{EstablishedVoice, VoiceGatewayClient};
