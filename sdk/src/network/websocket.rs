//! Plumbing shared by the chat gateway and voice gateway connections.

use std::time::Duration;

use async_channel::{unbounded, Sender};
use finchvoice_protocol::ProtocolError;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Fire-and-forget handle to a connection's writer task.
#[derive(Clone)]
pub(crate) struct Outgoing {
    tx: Sender<Message>,
    label: &'static str,
}

impl Outgoing {
    pub(crate) fn send_text(&self, text: String) {
        if self.tx.try_send(Message::Text(text.into())).is_err() {
            debug!("{} Writer stopped, dropping outbound frame", self.label);
        }
    }
}

/// Spawn the task that owns the sink. On cancellation it flushes whatever was
/// already queued, then sends a close frame.
pub(crate) fn spawn_writer<S>(mut sink: S, label: &'static str, cancel: CancellationToken) -> Outgoing
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
{
    let (tx, rx) = unbounded::<Message>();

    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };

            if let Err(e) = sink.send(message).await {
                warn!("{} Send failed: {}", label, e);
            }
        }

        while let Ok(message) = rx.try_recv() {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;

        debug!("{} Writer stopped", label);
    });

    Outgoing { tx, label }
}

/// Send `payload()` every `interval`, first beat one interval from now.
pub(crate) fn spawn_heartbeat<F>(
    interval: Duration,
    outgoing: Outgoing,
    cancel: CancellationToken,
    mut payload: F,
) where
    F: FnMut() -> Result<String, ProtocolError> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match payload() {
                Ok(text) => {
                    trace!("{} Heartbeat", outgoing.label);
                    outgoing.send_text(text);
                }
                Err(e) => warn!("{} Failed to encode heartbeat: {}", outgoing.label, e),
            }
        }
    });
}

pub(crate) enum Inbound {
    Text(String),
    Closed(String),
}

/// Wait for the next text frame, skipping control and binary frames.
pub(crate) async fn next_text<S>(stream: &mut S) -> Inbound
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Inbound::Text(text.as_str().to_owned()),
            Some(Ok(Message::Close(frame))) => return Inbound::Closed(describe_close(frame.as_ref())),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Inbound::Closed(e.to_string()),
            None => return Inbound::Closed("connection ended".to_string()),
        }
    }
}

fn describe_close(frame: Option<&CloseFrame>) -> String {
    match frame {
        Some(frame) => format!("close code {}: {}", u16::from(frame.code), frame.reason.as_str()),
        None => "closed without a close frame".to_string(),
    }
}
