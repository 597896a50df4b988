//! Chat gateway frames.
//!
//! Every frame is a JSON object `{op, d, t, s}`. Only the subset needed to
//! negotiate a voice session is typed; everything else surfaces as
//! [`GatewayEvent::Other`] or [`DispatchEvent::Other`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::opcode::GatewayOpcode;

/// Dispatch name announcing a voice state change (carries our `session_id`).
pub const VOICE_STATE_UPDATE: &str = "VOICE_STATE_UPDATE";

/// Dispatch name assigning a voice server (carries `token` and `endpoint`).
pub const VOICE_SERVER_UPDATE: &str = "VOICE_SERVER_UPDATE";

#[derive(Debug, Deserialize)]
struct InboundFrame {
    op: Option<u64>,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    s: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SequenceOnly {
    #[serde(default)]
    s: Option<u64>,
}

#[derive(Debug, Serialize)]
struct OutboundFrame<T: Serialize> {
    op: u8,
    d: T,
}

/// A parsed inbound chat gateway frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Dispatch {
        sequence: Option<u64>,
        event: DispatchEvent,
    },
    Hello {
        heartbeat_interval: Duration,
    },
    HeartbeatAck,
    /// Server asked for an immediate heartbeat.
    HeartbeatRequest,
    Reconnect,
    InvalidSession,
    Other {
        op: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    VoiceStateUpdate(VoiceState),
    VoiceServerUpdate(VoiceServer),
    Other(String),
}

/// The session half of a voice session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceState {
    pub user_id: String,
    pub session_id: String,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
}

/// The server half of a voice session.
#[derive(Clone, PartialEq, Eq)]
pub struct VoiceServer {
    pub token: String,
    pub endpoint: String,
    pub guild_id: Option<String>,
}

impl std::fmt::Debug for VoiceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceServer")
            .field("token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct VoiceStateData {
    user_id: Option<String>,
    session_id: Option<String>,
    guild_id: Option<String>,
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VoiceServerData {
    token: Option<String>,
    endpoint: Option<String>,
    guild_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelloData {
    heartbeat_interval: Option<f64>,
}

impl GatewayEvent {
    /// Parse one text frame.
    ///
    /// # Errors
    /// Returns error for non-JSON text, a missing `op`, or an interpreted
    /// event whose required fields are absent.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: InboundFrame = serde_json::from_str(text)?;
        let op = frame.op.ok_or(ProtocolError::MissingField("op"))?;
        let op = u8::try_from(op).map_err(|_| ProtocolError::InvalidField {
            field: "op",
            reason: format!("{} is out of range", op),
        })?;

        let Ok(opcode) = GatewayOpcode::try_from(op) else {
            return Ok(Self::Other { op });
        };

        match opcode {
            GatewayOpcode::Dispatch => {
                let name = frame.t.ok_or(ProtocolError::MissingField("t"))?;
                Ok(Self::Dispatch {
                    sequence: frame.s,
                    event: DispatchEvent::parse(name, frame.d)?,
                })
            }
            GatewayOpcode::Hello => {
                let hello: HelloData = serde_json::from_value(frame.d)?;
                let millis = hello
                    .heartbeat_interval
                    .ok_or(ProtocolError::MissingField("heartbeat_interval"))?;
                Ok(Self::Hello {
                    heartbeat_interval: interval_from_millis(millis)?,
                })
            }
            GatewayOpcode::HeartbeatAck => Ok(Self::HeartbeatAck),
            GatewayOpcode::Heartbeat => Ok(Self::HeartbeatRequest),
            GatewayOpcode::Reconnect => Ok(Self::Reconnect),
            GatewayOpcode::InvalidSession => Ok(Self::InvalidSession),
            // Client-to-server only; echoing them back is meaningless.
            GatewayOpcode::Identify | GatewayOpcode::VoiceStateUpdate => Ok(Self::Other { op }),
        }
    }
}

impl DispatchEvent {
    fn parse(name: String, d: Value) -> Result<Self, ProtocolError> {
        match name.as_str() {
            VOICE_STATE_UPDATE => {
                let data: VoiceStateData = serde_json::from_value(d)?;
                Ok(Self::VoiceStateUpdate(VoiceState {
                    user_id: data.user_id.ok_or(ProtocolError::MissingField("user_id"))?,
                    session_id: data
                        .session_id
                        .ok_or(ProtocolError::MissingField("session_id"))?,
                    guild_id: data.guild_id,
                    channel_id: data.channel_id,
                }))
            }
            VOICE_SERVER_UPDATE => {
                let data: VoiceServerData = serde_json::from_value(d)?;
                Ok(Self::VoiceServerUpdate(VoiceServer {
                    token: data.token.ok_or(ProtocolError::MissingField("token"))?,
                    // `null` while the voice server is being reallocated.
                    endpoint: data
                        .endpoint
                        .filter(|e| !e.is_empty())
                        .ok_or(ProtocolError::MissingField("endpoint"))?,
                    guild_id: data.guild_id,
                }))
            }
            _ => Ok(Self::Other(name)),
        }
    }
}

/// Read only the `s` field of a frame. A dispatch whose payload does not
/// parse still carries a sequence the heartbeat has to echo.
#[must_use]
pub fn peek_sequence(text: &str) -> Option<u64> {
    serde_json::from_str::<SequenceOnly>(text).ok()?.s
}

/// Convert a heartbeat interval in milliseconds into a [`Duration`].
///
/// # Errors
/// Returns error if the interval is not a positive finite number.
pub fn interval_from_millis(millis: f64) -> Result<Duration, ProtocolError> {
    if !millis.is_finite() || millis <= 0.0 {
        return Err(ProtocolError::InvalidField {
            field: "heartbeat_interval",
            reason: format!("{} is not a positive interval", millis),
        });
    }
    Ok(Duration::from_secs_f64(millis / 1000.0))
}

/// Client properties sent with IDENTIFY.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

#[derive(Serialize)]
struct IdentifyData<'a> {
    token: &'a str,
    properties: &'a ConnectionProperties,
    intents: u64,
}

#[derive(Serialize)]
struct VoiceStateUpdateData<'a> {
    guild_id: &'a str,
    channel_id: Option<&'a str>,
    self_mute: bool,
    self_deaf: bool,
}

/// Encode IDENTIFY (`op 2`).
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_identify(
    token: &str,
    properties: &ConnectionProperties,
    intents: u64,
) -> Result<String, ProtocolError> {
    encode(
        GatewayOpcode::Identify,
        IdentifyData {
            token,
            properties,
            intents,
        },
    )
}

/// Encode VOICE_STATE_UPDATE (`op 4`). A `None` channel leaves voice.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_voice_state_update(
    guild_id: &str,
    channel_id: Option<&str>,
    self_mute: bool,
    self_deaf: bool,
) -> Result<String, ProtocolError> {
    encode(
        GatewayOpcode::VoiceStateUpdate,
        VoiceStateUpdateData {
            guild_id,
            channel_id,
            self_mute,
            self_deaf,
        },
    )
}

/// Encode HEARTBEAT (`op 1`) with the last dispatch sequence seen.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_heartbeat(last_sequence: Option<u64>) -> Result<String, ProtocolError> {
    encode(GatewayOpcode::Heartbeat, last_sequence)
}

fn encode<T: Serialize>(op: GatewayOpcode, d: T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&OutboundFrame { op: op.as_u8(), d })?)
}
