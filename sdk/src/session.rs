use std::sync::Arc;
use std::time::Duration;

use async_channel::{bounded, Receiver, Sender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CallConfig;
use crate::error::{CodecError, SdkError, TransportError};
use crate::network::{EstablishedVoice, SignalingClient, SignalingEvent, VoiceGatewayClient};
use crate::transport::{CountersSnapshot, MediaSocket, MediaTransport, SocketLayer, TransportCounters};
use crate::voice::{
    CaptureDevice, FrameDecoder, FrameEncoder, OpusFrameDecoder, OpusFrameEncoder, PlaybackDevice,
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF_DOUBLINGS: u32 = 3;
const COMMAND_QUEUE_CAPACITY: usize = 8;

/// Delay before retry number `attempt + 1`: 1 s, 2 s, 4 s, then 8 s.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    INITIAL_BACKOFF * 2u32.pow(attempt.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS))
}

/// Why a connected call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEnded {
    HungUp,
    SignalingClosed(String),
    VoiceGatewayClosed(String),
    TransportClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Connecting,
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy)]
enum CallCommand {
    Mute,
    Unmute,
}

/// Codec halves and audio devices for one call.
pub struct CallMedia {
    pub encoder: Box<dyn FrameEncoder>,
    pub decoder: Box<dyn FrameDecoder>,
    pub capture: Box<dyn CaptureDevice>,
    pub playback: Box<dyn PlaybackDevice>,
    /// Applied to the UDP socket once the handshake is done.
    pub socket_layer: Option<SocketLayer>,
}

impl CallMedia {
    /// Opus at `bitrate` with the given devices.
    ///
    /// # Errors
    /// Returns [`CodecError`] if either Opus half fails to initialize.
    pub fn opus(
        bitrate: i32,
        capture: Box<dyn CaptureDevice>,
        playback: Box<dyn PlaybackDevice>,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            encoder: Box::new(OpusFrameEncoder::new(bitrate)?),
            decoder: Box::new(OpusFrameDecoder::new()?),
            capture,
            playback,
            socket_layer: None,
        })
    }

    #[must_use]
    pub fn with_socket_layer(mut self, layer: SocketLayer) -> Self {
        self.socket_layer = Some(layer);
        self
    }
}

/// One voice call: signaling, handshake, then media until hang-up or failure.
///
/// The media transport is only built from the credentials a completed
/// handshake returns. Dropping the session hangs up.
pub struct CallSession {
    hang_up: CancellationToken,
    commands: Sender<CallCommand>,
    state: watch::Receiver<CallState>,
    ended: watch::Receiver<Option<CallEnded>>,
    counters: watch::Receiver<Option<Arc<TransportCounters>>>,
    task: Option<JoinHandle<Result<CallEnded, SdkError>>>,
}

impl CallSession {
    /// Validate `config` and start the call in the background. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`SdkError::Config`] if the config is incomplete.
    pub fn start(config: CallConfig, media: CallMedia) -> Result<Self, SdkError> {
        config.validate()?;

        let hang_up = CancellationToken::new();
        let (commands_tx, commands_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let (state_tx, state) = watch::channel(CallState::Connecting);
        let (ended_tx, ended) = watch::channel(None);
        let (counters_tx, counters) = watch::channel(None);

        let task = tokio::spawn(Self::run(
            config,
            media,
            hang_up.clone(),
            commands_rx,
            state_tx,
            ended_tx,
            counters_tx,
        ));

        Ok(Self {
            hang_up,
            commands: commands_tx,
            state,
            ended,
            counters,
            task: Some(task),
        })
    }

    pub fn hang_up(&self) {
        self.hang_up.cancel();
    }

    /// Stop sending audio; incoming audio keeps playing.
    pub fn mute(&self) {
        self.send_command(CallCommand::Mute);
    }

    pub fn unmute(&self) {
        self.send_command(CallCommand::Unmute);
    }

    /// Queue `command` for the call task. Returns `false` if it was dropped
    /// because the queue is full or the call is over.
    fn send_command(&self, command: CallCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(e) => {
                debug!("[Call] Dropping {:?} command: {}", command, e);
                false
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state.clone()
    }

    /// The end reason, once a connected call has ended.
    #[must_use]
    pub fn end_reason(&self) -> Option<CallEnded> {
        self.ended.borrow().clone()
    }

    /// Transport counters, once media is flowing.
    #[must_use]
    pub fn counters(&self) -> Option<CountersSnapshot> {
        self.counters.borrow().as_ref().map(|c| c.snapshot())
    }

    /// Wait for the call to finish.
    ///
    /// # Errors
    /// Returns the error that prevented the call from connecting, or
    /// [`SdkError::Task`] if the call task panicked or was already awaited.
    pub async fn wait(&mut self) -> Result<CallEnded, SdkError> {
        let Some(task) = self.task.take() else {
            return self
                .end_reason()
                .ok_or_else(|| SdkError::Task("call already awaited".to_string()));
        };
        task.await.map_err(|e| SdkError::Task(e.to_string()))?
    }

    async fn run(
        config: CallConfig,
        media: CallMedia,
        hang_up: CancellationToken,
        commands: Receiver<CallCommand>,
        state_tx: watch::Sender<CallState>,
        ended_tx: watch::Sender<Option<CallEnded>>,
        counters_tx: watch::Sender<Option<Arc<TransportCounters>>>,
    ) -> Result<CallEnded, SdkError> {
        let root = CancellationToken::new();
        let result = Self::drive(&config, media, &hang_up, &commands, &state_tx, &counters_tx, &root).await;
        root.cancel();

        match &result {
            Ok(reason) => {
                info!("[Call] Ended: {:?}", reason);
                ended_tx.send_replace(Some(reason.clone()));
            }
            Err(e) => error!("[Call] Failed: {}", e),
        }
        state_tx.send_replace(CallState::Ended);
        result
    }

    async fn drive(
        config: &CallConfig,
        media: CallMedia,
        hang_up: &CancellationToken,
        commands: &Receiver<CallCommand>,
        state_tx: &watch::Sender<CallState>,
        counters_tx: &watch::Sender<Option<Arc<TransportCounters>>>,
        root: &CancellationToken,
    ) -> Result<CallEnded, SdkError> {
        let (signaling, established) = tokio::select! {
            () = hang_up.cancelled() => return Ok(CallEnded::HungUp),
            connected = Self::connect_with_retry(config, root) => connected?,
        };
        let EstablishedVoice {
            credentials,
            socket,
            gateway,
        } = established;

        let socket: Arc<dyn MediaSocket> = match media.socket_layer {
            Some(layer) => Arc::from(layer(socket)),
            None => Arc::new(socket),
        };
        let mut transport = MediaTransport::new(
            credentials,
            socket,
            media.encoder,
            media.decoder,
            media.capture,
            media.playback,
            root.child_token(),
        );
        counters_tx.send_replace(Some(transport.shared_counters()));
        let transport_closed = transport.closed_token();

        transport.start_capturing()?;
        gateway.set_speaking(true);
        state_tx.send_replace(CallState::Active);
        info!("[Call] Connected, ssrc={}", transport.ssrc());

        let reason = loop {
            tokio::select! {
                () = hang_up.cancelled() => break CallEnded::HungUp,
                command = commands.recv() => match command {
                    Ok(CallCommand::Mute) => {
                        transport.stop_capturing();
                        gateway.set_speaking(false);
                    }
                    Ok(CallCommand::Unmute) => match transport.start_capturing() {
                        Ok(()) => gateway.set_speaking(true),
                        Err(TransportError::AlreadyCapturing) => {}
                        Err(e) => warn!("[Call] Failed to resume capture: {}", e),
                    },
                    Err(_) => break CallEnded::HungUp,
                },
                event = signaling.next_event() => match event {
                    Some(SignalingEvent::Disconnected(reason)) => break CallEnded::SignalingClosed(reason),
                    Some(SignalingEvent::SessionReady(_)) => {}
                    None => break CallEnded::SignalingClosed("gateway tasks ended".to_string()),
                },
                reason = gateway.closed() => break CallEnded::VoiceGatewayClosed(reason),
                () = transport_closed.cancelled() => break CallEnded::TransportClosed,
            }
        };

        transport.stop_capturing();
        gateway.set_speaking(false);
        signaling.leave_voice();
        transport.shutdown();
        gateway.close();
        signaling.close();

        Ok(reason)
    }

    async fn connect_with_retry(
        config: &CallConfig,
        root: &CancellationToken,
    ) -> Result<(SignalingClient, EstablishedVoice), SdkError> {
        let attempts = config.max_connect_attempts;
        let mut attempt = 1;

        loop {
            info!("[Call] Connecting (attempt {}/{})", attempt, attempts);
            let token = root.child_token();

            match Self::connect_once(config, &token).await {
                Ok(connected) => return Ok(connected),
                Err(e) if attempt < attempts => {
                    token.cancel();
                    let delay = backoff_delay(attempt);
                    warn!("[Call] Attempt {} failed: {}, retrying in {:?}", attempt, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    token.cancel();
                    return Err(e);
                }
            }
        }
    }

    async fn connect_once(
        config: &CallConfig,
        token: &CancellationToken,
    ) -> Result<(SignalingClient, EstablishedVoice), SdkError> {
        let signaling = SignalingClient::connect(config, token.child_token()).await?;
        let params = signaling
            .wait_for_session(config.session_ready_timeout())
            .await?;
        let established =
            VoiceGatewayClient::establish(&params, config.handshake_timeout(), token.child_token()).await?;
        Ok((signaling, established))
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.hang_up.cancel();
    }
}
