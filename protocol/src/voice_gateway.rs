//! Voice gateway frames (`wss://{endpoint}/?v=4`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::gateway::interval_from_millis;
use crate::opcode::VoiceOpcode;

/// The only encryption mode this client negotiates.
pub const ENCRYPTION_MODE: &str = "xsalsa20_poly1305";

/// Secret key width for [`ENCRYPTION_MODE`].
pub const SECRET_KEY_LEN: usize = 32;

#[derive(Debug, Deserialize)]
struct InboundFrame {
    op: Option<u64>,
    #[serde(default)]
    d: Value,
}

#[derive(Debug, Deserialize)]
struct OpcodeOnly {
    op: Option<u64>,
}

#[derive(Debug, Serialize)]
struct OutboundFrame<T: Serialize> {
    op: u8,
    d: T,
}

/// A parsed inbound voice gateway frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceGatewayEvent {
    Hello { heartbeat_interval: Duration },
    Ready(VoiceReady),
    SessionDescription(SessionDescription),
    HeartbeatAck,
    Speaking,
    Other { op: u8 },
}

/// Op 2 READY: where to send media and with which SSRC.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceReady {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

impl VoiceReady {
    /// Fails unless the server offers [`ENCRYPTION_MODE`].
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidField`] on `modes`.
    pub fn require_mode(&self) -> Result<(), ProtocolError> {
        if self.modes.iter().any(|m| m == ENCRYPTION_MODE) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidField {
                field: "modes",
                reason: format!("{} not offered (got {:?})", ENCRYPTION_MODE, self.modes),
            })
        }
    }
}

/// Op 4 SESSION_DESCRIPTION.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: [u8; SECRET_KEY_LEN],
}

impl std::fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDescription")
            .field("mode", &self.mode)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct SessionDescriptionData {
    mode: Option<String>,
    secret_key: Option<Vec<u8>>,
}

#[derive(Deserialize)]
struct HelloData {
    heartbeat_interval: Option<f64>,
}

impl VoiceGatewayEvent {
    /// Parse one text frame.
    ///
    /// # Errors
    /// Returns error for non-JSON text, a missing `op`, or a handshake frame
    /// with missing or ill-typed fields.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: InboundFrame = serde_json::from_str(text)?;
        let op = frame.op.ok_or(ProtocolError::MissingField("op"))?;
        let op = u8::try_from(op).map_err(|_| ProtocolError::InvalidField {
            field: "op",
            reason: format!("{} is out of range", op),
        })?;

        let Ok(opcode) = VoiceOpcode::try_from(op) else {
            return Ok(Self::Other { op });
        };

        match opcode {
            VoiceOpcode::Hello => {
                let hello: HelloData = serde_json::from_value(frame.d)?;
                let millis = hello
                    .heartbeat_interval
                    .ok_or(ProtocolError::MissingField("heartbeat_interval"))?;
                Ok(Self::Hello {
                    heartbeat_interval: interval_from_millis(millis)?,
                })
            }
            VoiceOpcode::Ready => Ok(Self::Ready(serde_json::from_value(frame.d)?)),
            VoiceOpcode::SessionDescription => {
                let data: SessionDescriptionData = serde_json::from_value(frame.d)?;
                let mode = data.mode.ok_or(ProtocolError::MissingField("mode"))?;
                let key = data
                    .secret_key
                    .ok_or(ProtocolError::MissingField("secret_key"))?;
                let secret_key: [u8; SECRET_KEY_LEN] =
                    key.as_slice()
                        .try_into()
                        .map_err(|_| ProtocolError::InvalidField {
                            field: "secret_key",
                            reason: format!("expected {} bytes, got {}", SECRET_KEY_LEN, key.len()),
                        })?;
                Ok(Self::SessionDescription(SessionDescription { mode, secret_key }))
            }
            VoiceOpcode::HeartbeatAck => Ok(Self::HeartbeatAck),
            VoiceOpcode::Speaking => Ok(Self::Speaking),
            VoiceOpcode::Identify | VoiceOpcode::SelectProtocol | VoiceOpcode::Heartbeat => {
                Ok(Self::Other { op })
            }
        }
    }
}

/// Read only the opcode of a frame, ignoring its payload. `None` for
/// non-JSON text or an opcode this client does not know.
#[must_use]
pub fn peek_opcode(text: &str) -> Option<VoiceOpcode> {
    let op = serde_json::from_str::<OpcodeOnly>(text).ok()?.op?;
    VoiceOpcode::try_from(u8::try_from(op).ok()?).ok()
}

#[derive(Serialize)]
struct IdentifyData<'a> {
    server_id: &'a str,
    user_id: &'a str,
    session_id: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct SelectProtocolData<'a> {
    protocol: &'static str,
    data: SelectProtocolAddress<'a>,
}

#[derive(Serialize)]
struct SelectProtocolAddress<'a> {
    address: &'a str,
    port: u16,
    mode: &'static str,
}

#[derive(Serialize)]
struct SpeakingData {
    speaking: u8,
    delay: u32,
    ssrc: u32,
}

/// Encode voice IDENTIFY (`op 0`).
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_identify(
    server_id: &str,
    user_id: &str,
    session_id: &str,
    token: &str,
) -> Result<String, ProtocolError> {
    encode(
        VoiceOpcode::Identify,
        IdentifyData {
            server_id,
            user_id,
            session_id,
            token,
        },
    )
}

/// Encode SELECT_PROTOCOL (`op 1`) for our externally visible address.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_select_protocol(address: &str, port: u16) -> Result<String, ProtocolError> {
    encode(
        VoiceOpcode::SelectProtocol,
        SelectProtocolData {
            protocol: "udp",
            data: SelectProtocolAddress {
                address,
                port,
                mode: ENCRYPTION_MODE,
            },
        },
    )
}

/// Encode voice HEARTBEAT (`op 3`).
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_heartbeat(nonce: u64) -> Result<String, ProtocolError> {
    encode(VoiceOpcode::Heartbeat, nonce)
}

/// Encode SPEAKING (`op 5`).
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_speaking(speaking: bool, ssrc: u32) -> Result<String, ProtocolError> {
    encode(
        VoiceOpcode::Speaking,
        SpeakingData {
            speaking: u8::from(speaking),
            delay: 0,
            ssrc,
        },
    )
}

fn encode<T: Serialize>(op: VoiceOpcode, d: T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&OutboundFrame { op: op.as_u8(), d })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peeks_opcode_without_payload() {
        let broken_ready = r#"{"op":2,"d":{"ssrc":"nope"}}"#;
        assert!(VoiceGatewayEvent::parse(broken_ready).is_err());
        assert_eq!(peek_opcode(broken_ready), Some(VoiceOpcode::Ready));

        assert_eq!(peek_opcode(r#"{"op":4,"d":null}"#), Some(VoiceOpcode::SessionDescription));
        assert_eq!(peek_opcode(r#"{"op":300}"#), None);
        assert_eq!(peek_opcode(r#"{"d":{}}"#), None);
        assert_eq!(peek_opcode("not json at all"), None);
    }

    #[test]
    fn parses_ready() {
        let text = r#"{"op":2,"d":{"ssrc":42,"ip":"10.0.0.1","port":50000,"modes":["aead_aes256_gcm","xsalsa20_poly1305"],"heartbeat_interval":1}}"#;
        let VoiceGatewayEvent::Ready(ready) = VoiceGatewayEvent::parse(text).unwrap() else {
            panic!("expected READY");
        };
        assert_eq!(ready.ssrc, 42);
        assert_eq!(ready.ip, "10.0.0.1");
        assert_eq!(ready.port, 50000);
        assert!(ready.require_mode().is_ok());
    }

    #[test]
    fn ready_without_supported_mode_is_rejected() {
        let text = r#"{"op":2,"d":{"ssrc":42,"ip":"10.0.0.1","port":50000,"modes":["aead_aes256_gcm_rtpsize"]}}"#;
        let VoiceGatewayEvent::Ready(ready) = VoiceGatewayEvent::parse(text).unwrap() else {
            panic!("expected READY");
        };
        assert!(matches!(
            ready.require_mode(),
            Err(ProtocolError::InvalidField { field: "modes", .. })
        ));
    }

    #[test]
    fn ready_missing_ssrc_is_an_error() {
        let text = r#"{"op":2,"d":{"ip":"10.0.0.1","port":50000,"modes":[]}}"#;
        assert!(VoiceGatewayEvent::parse(text).is_err());
    }

    #[test]
    fn parses_session_description() {
        let key: Vec<String> = (0..32).map(|i| i.to_string()).collect();
        let text = format!(
            r#"{{"op":4,"d":{{"mode":"xsalsa20_poly1305","secret_key":[{}]}}}}"#,
            key.join(",")
        );
        let VoiceGatewayEvent::SessionDescription(description) =
            VoiceGatewayEvent::parse(&text).unwrap()
        else {
            panic!("expected SESSION_DESCRIPTION");
        };
        assert_eq!(description.mode, ENCRYPTION_MODE);
        assert_eq!(description.secret_key[31], 31);
        assert!(!format!("{:?}", description).contains("31"));
    }

    #[test]
    fn short_secret_key_is_rejected() {
        let text = r#"{"op":4,"d":{"mode":"xsalsa20_poly1305","secret_key":[1,2,3]}}"#;
        assert!(matches!(
            VoiceGatewayEvent::parse(text),
            Err(ProtocolError::InvalidField { field: "secret_key", .. })
        ));
    }

    #[test]
    fn parses_hello_and_ack() {
        assert_eq!(
            VoiceGatewayEvent::parse(r#"{"op":8,"d":{"v":4,"heartbeat_interval":13750.0}}"#).unwrap(),
            VoiceGatewayEvent::Hello {
                heartbeat_interval: Duration::from_millis(13750)
            }
        );
        assert_eq!(
            VoiceGatewayEvent::parse(r#"{"op":6,"d":1700000000000}"#).unwrap(),
            VoiceGatewayEvent::HeartbeatAck
        );
        assert_eq!(
            VoiceGatewayEvent::parse(r#"{"op":13,"d":{"user_id":"1"}}"#).unwrap(),
            VoiceGatewayEvent::Other { op: 13 }
        );
    }

    #[test]
    fn encodes_outbound_frames() {
        let identify: Value =
            serde_json::from_str(&encode_identify("7", "42", "abc", "tok").unwrap()).unwrap();
        assert_eq!(identify["op"], 0);
        assert_eq!(identify["d"]["server_id"], "7");
        assert_eq!(identify["d"]["session_id"], "abc");

        let select: Value =
            serde_json::from_str(&encode_select_protocol("203.0.113.5", 40000).unwrap()).unwrap();
        assert_eq!(select["op"], 1);
        assert_eq!(select["d"]["protocol"], "udp");
        assert_eq!(select["d"]["data"]["address"], "203.0.113.5");
        assert_eq!(select["d"]["data"]["port"], 40000);
        assert_eq!(select["d"]["data"]["mode"], ENCRYPTION_MODE);

        assert_eq!(
            encode_speaking(true, 42).unwrap(),
            r#"{"op":5,"d":{"speaking":1,"delay":0,"ssrc":42}}"#
        );
        assert_eq!(encode_heartbeat(7).unwrap(), r#"{"op":3,"d":7}"#);
    }
}
