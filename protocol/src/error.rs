use std::fmt;

/// Protocol decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    PacketTooShort { expected: usize, got: usize },
    UnknownOpcode(u8),
    UnexpectedPacketType(u16),
    InvalidJson(String),
    MissingField(&'static str),
    InvalidField { field: &'static str, reason: String },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::PacketTooShort { expected, got } => {
                write!(f, "packet too short: expected at least {} bytes, got {}", expected, got)
            }
            ProtocolError::UnknownOpcode(op) => {
                write!(f, "unknown opcode: {}", op)
            }
            ProtocolError::UnexpectedPacketType(kind) => {
                write!(f, "unexpected packet type: 0x{:04x}", kind)
            }
            ProtocolError::InvalidJson(e) => {
                write!(f, "invalid JSON frame: {}", e)
            }
            ProtocolError::MissingField(field) => {
                write!(f, "missing required field `{}`", field)
            }
            ProtocolError::InvalidField { field, reason } => {
                write!(f, "invalid field `{}`: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::InvalidJson(e.to_string())
    }
}
