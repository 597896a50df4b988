use std::time::Duration;

use finchvoice_protocol::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Opus encode/decode failures. Always recoverable: the frame is dropped.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("Codec initialization error: {0}")]
    Initialization(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Frame must hold exactly {expected} samples, got {got}")]
    FrameLength { expected: usize, got: usize },
}

/// Secure channel failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Tag verification failed: forged, corrupted or wrongly keyed packet.
    #[error("Authentication failure")]
    AuthenticationFailure,

    #[error("Failed to seal payload")]
    SealFailure,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("UDP socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture is already running")]
    AlreadyCapturing,

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Transport closed")]
    Closed,
}

/// Chat gateway failures.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("Gateway connection failed: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Gateway protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Gateway closed: {0}")]
    Closed(String),

    #[error("No voice session within {0:?}")]
    SessionTimeout(Duration),

    #[error("Cancelled")]
    Cancelled,
}

/// Voice gateway handshake failures. All are fatal to the connect attempt.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Voice gateway connection failed: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Voice gateway protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Voice gateway closed during handshake: {0}")]
    Closed(String),

    #[error("UDP error during IP discovery: {0}")]
    Io(#[from] std::io::Error),

    #[error("IP discovery timed out after {0:?}")]
    DiscoveryTimeout(Duration),

    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,
}

/// Umbrella error for the call session surface.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Call task failed: {0}")]
    Task(String),
}
