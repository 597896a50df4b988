use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_channel::{unbounded, Receiver, Sender};
use finchvoice_protocol::voice_gateway::{self, VoiceGatewayEvent, ENCRYPTION_MODE};
use finchvoice_protocol::{ProtocolError, VoiceOpcode};
use futures_util::{Stream, StreamExt};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::crypto::SecretKey;
use crate::error::HandshakeError;
use crate::models::{VoiceCredentials, VoiceSessionParameters};
use crate::network::ip_discovery::discover_external_address;
use crate::network::websocket::{next_text, spawn_heartbeat, spawn_writer, Inbound, Outgoing};

pub const VOICE_GATEWAY_VERSION: u8 = 4;

type HandshakeItem = Result<VoiceGatewayEvent, ProtocolError>;

/// Build the voice gateway URL for an endpoint. Bare `host[:port]`
/// endpoints get `wss://`; explicit `ws://`/`wss://` prefixes are kept.
#[must_use]
pub fn voice_gateway_url(endpoint: &str) -> String {
    let base = if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_string()
    } else {
        format!("wss://{}", endpoint)
    };
    format!("{}/?v={}", base.trim_end_matches('/'), VOICE_GATEWAY_VERSION)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Result of a completed handshake: credentials, the UDP socket IP discovery
/// ran on, and the live gateway connection.
pub struct EstablishedVoice {
    pub credentials: VoiceCredentials,
    pub socket: UdpSocket,
    pub gateway: VoiceGatewayClient,
}

/// Live voice gateway connection, kept open after the handshake for
/// heartbeats and SPEAKING updates.
pub struct VoiceGatewayClient {
    outgoing: Outgoing,
    ssrc: u32,
    close_rx: watch::Receiver<Option<String>>,
    cancel: CancellationToken,
}

impl VoiceGatewayClient {
    /// Run IDENTIFY → READY → IP discovery → SELECT_PROTOCOL →
    /// SESSION_DESCRIPTION within `timeout`.
    ///
    /// # Errors
    /// Any [`HandshakeError`]; the connection is torn down before returning.
    pub async fn establish(
        params: &VoiceSessionParameters,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<EstablishedVoice, HandshakeError> {
        let result = tokio::select! {
            () = cancel.cancelled() => Err(HandshakeError::Cancelled),
            result = tokio::time::timeout(timeout, Self::handshake(params, cancel.clone())) => match result {
                Ok(result) => result,
                Err(_) => Err(HandshakeError::Timeout(timeout)),
            },
        };

        if result.is_err() {
            cancel.cancel();
        }
        result
    }

    async fn handshake(
        params: &VoiceSessionParameters,
        cancel: CancellationToken,
    ) -> Result<EstablishedVoice, HandshakeError> {
        let url = voice_gateway_url(&params.voice_endpoint);
        info!("[Voice gateway] Connecting to {}", url);

        let (ws, _) = connect_async(url.as_str()).await?;
        let (sink, stream) = ws.split();
        let outgoing = spawn_writer(sink, "[Voice gateway]", cancel.clone());

        let (handshake_tx, handshake_rx) = unbounded();
        let (close_tx, close_rx) = watch::channel(None);
        tokio::spawn(Self::read_loop(
            stream,
            outgoing.clone(),
            handshake_tx,
            close_tx,
            cancel.clone(),
        ));

        outgoing.send_text(voice_gateway::encode_identify(
            &params.guild_id,
            &params.user_id,
            &params.session_id,
            &params.voice_token,
        )?);

        let ready = match Self::next_event(&handshake_rx, &close_rx).await? {
            VoiceGatewayEvent::Ready(ready) => ready,
            other => return Err(unexpected("READY", &other).into()),
        };
        ready.require_mode()?;
        info!(
            "[Voice gateway] Ready: ssrc={} server={}:{}",
            ready.ssrc, ready.ip, ready.port
        );

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((ready.ip.as_str(), ready.port)).await?;
        let external = discover_external_address(&socket, ready.ssrc).await?;
        debug!(
            "[Voice gateway] External address {}:{}",
            external.address, external.port
        );

        outgoing.send_text(voice_gateway::encode_select_protocol(
            &external.address,
            external.port,
        )?);

        let description = match Self::next_event(&handshake_rx, &close_rx).await? {
            VoiceGatewayEvent::SessionDescription(description) => description,
            other => return Err(unexpected("SESSION_DESCRIPTION", &other).into()),
        };
        if description.mode != ENCRYPTION_MODE {
            return Err(ProtocolError::InvalidField {
                field: "mode",
                reason: format!("server selected {}", description.mode),
            }
            .into());
        }
        info!("[Voice gateway] Session established, mode={}", description.mode);

        let credentials = VoiceCredentials::new(
            ready.ssrc,
            SecretKey::new(description.secret_key),
            ready.ip,
            ready.port,
        );

        Ok(EstablishedVoice {
            gateway: Self {
                outgoing,
                ssrc: credentials.ssrc(),
                close_rx,
                cancel,
            },
            credentials,
            socket,
        })
    }

    async fn next_event(
        events: &Receiver<HandshakeItem>,
        close_rx: &watch::Receiver<Option<String>>,
    ) -> Result<VoiceGatewayEvent, HandshakeError> {
        match events.recv().await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(HandshakeError::Closed(
                close_rx
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| "connection ended".to_string()),
            )),
        }
    }

    /// Announce whether we are transmitting audio.
    pub fn set_speaking(&self, speaking: bool) {
        match voice_gateway::encode_speaking(speaking, self.ssrc) {
            Ok(text) => self.outgoing.send_text(text),
            Err(e) => warn!("[Voice gateway] Failed to encode speaking: {}", e),
        }
    }

    /// Resolves with the close reason once the server drops the connection.
    pub async fn closed(&self) -> String {
        let mut close_rx = self.close_rx.clone();
        let reason = match close_rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => "voice gateway reader ended".to_string(),
        };
        reason
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    async fn read_loop<S>(
        mut stream: S,
        outgoing: Outgoing,
        handshake_tx: Sender<HandshakeItem>,
        close_tx: watch::Sender<Option<String>>,
        cancel: CancellationToken,
    ) where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send + 'static,
    {
        let mut heartbeat: Option<CancellationToken> = None;

        loop {
            let inbound = tokio::select! {
                () = cancel.cancelled() => break,
                inbound = next_text(&mut stream) => inbound,
            };

            let text = match inbound {
                Inbound::Text(text) => text,
                Inbound::Closed(reason) => {
                    warn!("[Voice gateway] Connection closed: {}", reason);
                    close_tx.send_replace(Some(reason));
                    break;
                }
            };

            match VoiceGatewayEvent::parse(&text) {
                Ok(VoiceGatewayEvent::Hello { heartbeat_interval }) => {
                    debug!("[Voice gateway] Hello, heartbeat every {:?}", heartbeat_interval);
                    let token = cancel.child_token();
                    if let Some(previous) = heartbeat.replace(token.clone()) {
                        previous.cancel();
                    }
                    spawn_heartbeat(heartbeat_interval, outgoing.clone(), token, || {
                        voice_gateway::encode_heartbeat(unix_millis())
                    });
                }
                Ok(VoiceGatewayEvent::HeartbeatAck) => trace!("[Voice gateway] Heartbeat acknowledged"),
                Ok(event @ (VoiceGatewayEvent::Ready(_) | VoiceGatewayEvent::SessionDescription(_))) => {
                    // Nobody listens once the handshake is over.
                    let _ = handshake_tx.try_send(Ok(event));
                }
                Ok(VoiceGatewayEvent::Speaking) => trace!("[Voice gateway] Speaking update"),
                Ok(VoiceGatewayEvent::Other { op }) => trace!("[Voice gateway] Ignoring op {}", op),
                // Only a broken handshake frame fails the handshake.
                Err(e) => match voice_gateway::peek_opcode(&text) {
                    Some(VoiceOpcode::Ready | VoiceOpcode::SessionDescription) => {
                        if handshake_tx.try_send(Err(e.clone())).is_err() {
                            debug!("[Voice gateway] Dropping frame: {}", e);
                        }
                    }
                    _ => debug!("[Voice gateway] Dropping frame: {}", e),
                },
            }
        }

        if let Some(token) = heartbeat {
            token.cancel();
        }
        cancel.cancel();
        debug!("[Voice gateway] Reader stopped");
    }
}

fn unexpected(expected: &str, got: &VoiceGatewayEvent) -> ProtocolError {
    ProtocolError::InvalidField {
        field: "op",
        reason: format!("expected {}, got {:?}", expected, got),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_gateway_urls() {
        assert_eq!(
            voice_gateway_url("eu-west123.discord.media:443"),
            "wss://eu-west123.discord.media:443/?v=4"
        );
        assert_eq!(voice_gateway_url("ws://127.0.0.1:9000"), "ws://127.0.0.1:9000/?v=4");
        assert_eq!(voice_gateway_url("wss://voice.example/"), "wss://voice.example/?v=4");
    }

    #[test]
    fn unix_millis_is_after_2020() {
        assert!(unix_millis() > 1_577_836_800_000);
    }
}
