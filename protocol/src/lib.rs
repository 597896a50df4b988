//! Wire formats for a Discord-style voice client.
//!
//! No I/O lives here: the sdk owns sockets and websockets and hands text
//! frames and datagrams to these parsers.

pub mod error;
pub mod gateway;
pub mod io;
pub mod ip_discovery;
pub mod opcode;
pub mod rtp;
pub mod voice_gateway;

pub use error::ProtocolError;
pub use gateway::{ConnectionProperties, DispatchEvent, GatewayEvent, VoiceServer, VoiceState};
pub use ip_discovery::DiscoveredAddress;
pub use opcode::{GatewayOpcode, VoiceOpcode};
pub use rtp::{RtpHeader, RtpPacket, RTP_HEADER_LEN};
pub use voice_gateway::{SessionDescription, VoiceGatewayEvent, VoiceReady, ENCRYPTION_MODE};
