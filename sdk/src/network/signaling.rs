use std::sync::Arc;
use std::time::Duration;

use async_channel::{unbounded, Receiver, Sender};
use finchvoice_protocol::gateway::{self, ConnectionProperties, GatewayEvent};
use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::CallConfig;
use crate::error::SignalingError;
use crate::models::VoiceSessionParameters;
use crate::network::session_assembler::SessionAssembler;
use crate::network::websocket::{next_text, spawn_heartbeat, spawn_writer, Inbound, Outgoing};

/// Browser and device name announced in IDENTIFY.
pub const CLIENT_NAME: &str = "finchvoice";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Disconnected,
    Connecting,
    Identified,
    AwaitingVoiceServer,
    SessionReady,
    Closed,
}

#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// Both halves of the voice session arrived. Emitted once per connection.
    SessionReady(VoiceSessionParameters),
    /// The gateway connection failed or was closed by the server.
    Disconnected(String),
}

/// Chat gateway client that negotiates one voice session.
///
/// Does not reconnect; a closed connection is reported once through
/// [`SignalingEvent::Disconnected`] and retrying is up to the caller.
pub struct SignalingClient {
    state_tx: Arc<watch::Sender<SignalingState>>,
    events: Receiver<SignalingEvent>,
    outgoing: Outgoing,
    guild_id: String,
    cancel: CancellationToken,
}

impl SignalingClient {
    /// Open the gateway, IDENTIFY, and schedule the voice state update.
    ///
    /// # Errors
    /// Returns error if the websocket cannot be opened or IDENTIFY cannot be
    /// encoded.
    pub async fn connect(config: &CallConfig, cancel: CancellationToken) -> Result<Self, SignalingError> {
        let (state_tx, _) = watch::channel(SignalingState::Disconnected);
        let state_tx = Arc::new(state_tx);
        state_tx.send_replace(SignalingState::Connecting);

        info!("[Gateway] Connecting to {}", config.gateway_url);
        let (ws, _) = tokio::select! {
            () = cancel.cancelled() => return Err(SignalingError::Cancelled),
            result = connect_async(config.gateway_url.as_str()) => result?,
        };
        let (sink, stream) = ws.split();
        let outgoing = spawn_writer(sink, "[Gateway]", cancel.clone());

        let properties = ConnectionProperties {
            os: std::env::consts::OS.to_string(),
            browser: CLIENT_NAME.to_string(),
            device: CLIENT_NAME.to_string(),
        };
        outgoing.send_text(gateway::encode_identify(&config.token, &properties, config.intents)?);
        state_tx.send_replace(SignalingState::Identified);
        info!("[Gateway] Identify sent");

        let (event_tx, events) = unbounded();
        let assembler = SessionAssembler::new(&config.user_id, &config.guild_id, &config.channel_id);

        tokio::spawn(Self::read_loop(
            stream,
            outgoing.clone(),
            state_tx.clone(),
            assembler,
            event_tx,
            cancel.clone(),
        ));
        tokio::spawn(Self::announce_voice_state(
            outgoing.clone(),
            state_tx.clone(),
            config.guild_id.clone(),
            config.channel_id.clone(),
            config.voice_state_delay(),
            cancel.clone(),
        ));

        Ok(Self {
            state_tx,
            events,
            outgoing,
            guild_id: config.guild_id.clone(),
            cancel,
        })
    }

    #[must_use]
    pub fn state(&self) -> SignalingState {
        *self.state_tx.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SignalingState> {
        self.state_tx.subscribe()
    }

    /// Next event, or `None` once the connection's tasks have ended.
    pub async fn next_event(&self) -> Option<SignalingEvent> {
        self.events.recv().await.ok()
    }

    /// Wait until the voice session is assembled.
    ///
    /// # Errors
    /// [`SignalingError::SessionTimeout`] if nothing arrives within `timeout`,
    /// [`SignalingError::Closed`] if the gateway goes away first.
    pub async fn wait_for_session(&self, timeout: Duration) -> Result<VoiceSessionParameters, SignalingError> {
        let wait = async {
            loop {
                match self.next_event().await {
                    Some(SignalingEvent::SessionReady(params)) => return Ok(params),
                    Some(SignalingEvent::Disconnected(reason)) => return Err(SignalingError::Closed(reason)),
                    None => return Err(SignalingError::Closed("gateway tasks ended".to_string())),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SignalingError::SessionTimeout(timeout))?
    }

    /// Ask the gateway to remove us from the voice channel.
    pub fn leave_voice(&self) {
        match gateway::encode_voice_state_update(&self.guild_id, None, false, false) {
            Ok(text) => self.outgoing.send_text(text),
            Err(e) => warn!("[Gateway] Failed to encode voice leave: {}", e),
        }
    }

    /// Stop all connection tasks and close the websocket.
    pub fn close(&self) {
        self.cancel.cancel();
        self.state_tx.send_replace(SignalingState::Closed);
    }

    async fn announce_voice_state(
        outgoing: Outgoing,
        state_tx: Arc<watch::Sender<SignalingState>>,
        guild_id: String,
        channel_id: String,
        delay: Duration,
        cancel: CancellationToken,
    ) {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        match gateway::encode_voice_state_update(&guild_id, Some(&channel_id), false, false) {
            Ok(text) => outgoing.send_text(text),
            Err(e) => {
                warn!("[Gateway] Failed to encode voice state update: {}", e);
                return;
            }
        }

        state_tx.send_if_modified(|state| {
            if *state == SignalingState::Identified {
                *state = SignalingState::AwaitingVoiceServer;
                true
            } else {
                false
            }
        });
        info!("[Gateway] Joining voice channel {} in guild {}", channel_id, guild_id);
    }

    async fn read_loop<S>(
        mut stream: S,
        outgoing: Outgoing,
        state_tx: Arc<watch::Sender<SignalingState>>,
        mut assembler: SessionAssembler,
        event_tx: Sender<SignalingEvent>,
        cancel: CancellationToken,
    ) where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send + 'static,
    {
        let (sequence_tx, _) = watch::channel(None::<u64>);
        let mut heartbeat: Option<CancellationToken> = None;

        loop {
            let inbound = tokio::select! {
                () = cancel.cancelled() => break,
                inbound = next_text(&mut stream) => inbound,
            };

            let text = match inbound {
                Inbound::Text(text) => text,
                Inbound::Closed(reason) => {
                    warn!("[Gateway] Connection closed: {}", reason);
                    state_tx.send_replace(SignalingState::Closed);
                    let _ = event_tx.send(SignalingEvent::Disconnected(reason)).await;
                    break;
                }
            };

            let event = match GatewayEvent::parse(&text) {
                Ok(event) => event,
                Err(e) => {
                    if let Some(sequence) = gateway::peek_sequence(&text) {
                        sequence_tx.send_replace(Some(sequence));
                    }
                    debug!("[Gateway] Dropping frame: {}", e);
                    continue;
                }
            };

            match event {
                GatewayEvent::Hello { heartbeat_interval } => {
                    debug!("[Gateway] Hello, heartbeat every {:?}", heartbeat_interval);
                    let token = cancel.child_token();
                    if let Some(previous) = heartbeat.replace(token.clone()) {
                        previous.cancel();
                    }
                    let sequence = sequence_tx.subscribe();
                    spawn_heartbeat(heartbeat_interval, outgoing.clone(), token, move || {
                        gateway::encode_heartbeat(*sequence.borrow())
                    });
                }
                GatewayEvent::HeartbeatAck => trace!("[Gateway] Heartbeat acknowledged"),
                GatewayEvent::HeartbeatRequest => match gateway::encode_heartbeat(*sequence_tx.borrow()) {
                    Ok(text) => outgoing.send_text(text),
                    Err(e) => warn!("[Gateway] Failed to encode heartbeat: {}", e),
                },
                GatewayEvent::Dispatch { sequence, event } => {
                    if sequence.is_some() {
                        sequence_tx.send_replace(sequence);
                    }
                    if let Some(params) = assembler.on_dispatch(&event) {
                        info!(
                            "[Gateway] Voice session ready, endpoint={}",
                            params.voice_endpoint
                        );
                        state_tx.send_replace(SignalingState::SessionReady);
                        let _ = event_tx.send(SignalingEvent::SessionReady(params)).await;
                    }
                }
                GatewayEvent::Reconnect | GatewayEvent::InvalidSession => {
                    warn!("[Gateway] Server asked to re-establish the session");
                }
                GatewayEvent::Other { op } => trace!("[Gateway] Ignoring op {}", op),
            }
        }

        if let Some(token) = heartbeat {
            token.cancel();
        }
        cancel.cancel();
        debug!("[Gateway] Reader stopped");
    }
}
