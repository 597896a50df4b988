#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use async_channel::Sender;
use finchvoice_protocol::io::Writer;
use finchvoice_protocol::ip_discovery::{IP_DISCOVERY_BODY_LEN, IP_DISCOVERY_LEN, IP_DISCOVERY_RESPONSE};
use finchvoice_protocol::{RtpHeader, RtpPacket};
use finchvoice_sdk::crypto::{SecretKey, SecureChannel};
use finchvoice_sdk::voice::FRAME_SAMPLES;
use finchvoice_sdk::{AudioFrame, CallConfig, CaptureDevice, CodecError, FrameDecoder, FrameEncoder, PlaybackDevice, TransportError};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// A listening socket that plays one side of a websocket gateway.
pub struct TestGateway {
    listener: TcpListener,
    pub url: String,
}

impl TestGateway {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        Self { listener, url }
    }

    pub async fn accept(&self) -> TestConnection {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        TestConnection {
            ws: accept_async(stream).await.unwrap(),
        }
    }
}

pub struct TestConnection {
    ws: WebSocketStream<TcpStream>,
}

impl TestConnection {
    pub async fn send_json(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    /// Next JSON frame, or `None` once the client closes.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            let message = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")?;
            match message {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(text.as_str()).unwrap()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Next frame with the given op, skipping heartbeats and anything else.
    pub async fn recv_op(&mut self, op: u64) -> Value {
        loop {
            let frame = self.recv_json().await.expect("connection closed");
            if frame["op"] == op {
                return frame;
            }
        }
    }

    /// Forward every remaining frame to `log` until the client disconnects.
    pub async fn drain_into(mut self, log: Sender<Value>) {
        while let Some(Ok(message)) = self.ws.next().await {
            if let Message::Text(text) = message {
                if let Ok(frame) = serde_json::from_str(text.as_str()) {
                    let _ = log.send(frame).await;
                }
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

pub fn call_config(gateway_url: &str) -> CallConfig {
    CallConfig {
        token: "bot-token".to_string(),
        user_id: "100".to_string(),
        guild_id: "200".to_string(),
        channel_id: "300".to_string(),
        gateway_url: gateway_url.to_string(),
        voice_state_delay_ms: 10,
        session_ready_timeout_ms: 3_000,
        handshake_timeout_ms: 3_000,
        max_connect_attempts: 1,
        ..CallConfig::default()
    }
}

/// Play the chat gateway up to and including session assembly.
pub async fn script_chat_gateway(conn: &mut TestConnection, voice_endpoint: &str) {
    conn.send_json(serde_json::json!({"op": 10, "d": {"heartbeat_interval": 45000}})).await;

    let identify = conn.recv_op(2).await;
    assert_eq!(identify["d"]["token"], "bot-token");

    let join = conn.recv_op(4).await;
    assert_eq!(join["d"]["guild_id"], "200");
    assert_eq!(join["d"]["channel_id"], "300");

    conn.send_json(serde_json::json!({
        "op": 0, "s": 1, "t": "VOICE_SERVER_UPDATE",
        "d": {"token": "voice-token", "guild_id": "200", "endpoint": voice_endpoint}
    }))
    .await;
    conn.send_json(serde_json::json!({
        "op": 0, "s": 2, "t": "VOICE_STATE_UPDATE",
        "d": {"user_id": "100", "guild_id": "200", "channel_id": "300", "session_id": "session-1"}
    }))
    .await;
}

/// Play the voice gateway handshake. Returns after SESSION_DESCRIPTION is sent.
pub async fn script_voice_gateway(conn: &mut TestConnection, udp_port: u16, ssrc: u32, key: [u8; 32]) {
    conn.send_json(serde_json::json!({"op": 8, "d": {"heartbeat_interval": 45000}})).await;

    let identify = conn.recv_op(0).await;
    assert_eq!(identify["d"]["server_id"], "200");
    assert_eq!(identify["d"]["user_id"], "100");
    assert_eq!(identify["d"]["session_id"], "session-1");
    assert_eq!(identify["d"]["token"], "voice-token");

    conn.send_json(serde_json::json!({
        "op": 2,
        "d": {"ssrc": ssrc, "ip": "127.0.0.1", "port": udp_port, "modes": ["aead_aes256_gcm_rtpsize", "xsalsa20_poly1305"]}
    }))
    .await;

    let select = conn.recv_op(1).await;
    assert_eq!(select["d"]["protocol"], "udp");
    assert_eq!(select["d"]["data"]["mode"], "xsalsa20_poly1305");
    assert_eq!(select["d"]["data"]["address"], "127.0.0.1");

    conn.send_json(serde_json::json!({
        "op": 4,
        "d": {"mode": "xsalsa20_poly1305", "secret_key": key.to_vec()}
    }))
    .await;
}

/// Answer one IP discovery request with the sender's own address.
pub async fn answer_ip_discovery(udp: &UdpSocket) -> SocketAddr {
    let mut buf = [0u8; 128];
    let (len, from) = tokio::time::timeout(STEP_TIMEOUT, udp.recv_from(&mut buf))
        .await
        .expect("no IP discovery request")
        .unwrap();
    assert_eq!(len, IP_DISCOVERY_LEN);

    let address = from.ip().to_string();
    let mut w = Writer::with_capacity(IP_DISCOVERY_LEN);
    w.write_u16(IP_DISCOVERY_RESPONSE);
    w.write_u16(IP_DISCOVERY_BODY_LEN);
    w.write_bytes(&buf[4..8]);
    w.write_bytes(address.as_bytes());
    w.write_zeros(64 - address.len());
    w.write_u16(from.port());
    udp.send_to(&w.into_vec(), from).await.unwrap();
    from
}

/// Receive one RTP datagram and open it.
pub async fn recv_voice_packet(udp: &UdpSocket, key: [u8; 32]) -> (RtpHeader, Vec<u8>) {
    let mut buf = [0u8; 1500];
    let (len, _) = tokio::time::timeout(STEP_TIMEOUT, udp.recv_from(&mut buf))
        .await
        .expect("no voice packet")
        .unwrap();
    let packet = RtpPacket::parse(&buf[..len]).unwrap();
    let plain = SecureChannel::new(&SecretKey::new(key))
        .open_for_header(packet.payload, &packet.raw_header)
        .unwrap();
    (packet.header, plain)
}

/// Build a sealed voice datagram carrying `level` as the fake codec payload.
pub fn voice_datagram(key: [u8; 32], sequence: u16, ssrc: u32, level: f32) -> Vec<u8> {
    let header = RtpHeader::voice(sequence, u32::from(sequence) * 960, ssrc);
    let sealed = SecureChannel::new(&SecretKey::new(key))
        .seal_for_header(&level.to_le_bytes(), &header.to_bytes())
        .unwrap();
    RtpPacket::assemble(&header, &sealed)
}

/// Encodes a frame as its first sample's bytes.
pub struct LevelEncoder;

impl FrameEncoder for LevelEncoder {
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, CodecError> {
        Ok(frame.samples()[0].to_le_bytes().to_vec())
    }
}

/// Inverse of [`LevelEncoder`]: a frame filled with the carried level.
pub struct LevelDecoder;

impl FrameDecoder for LevelDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<AudioFrame, CodecError> {
        let bytes: [u8; 4] = payload
            .try_into()
            .map_err(|_| CodecError::Decode("unexpected payload length".to_string()))?;
        AudioFrame::new(vec![f32::from_le_bytes(bytes); FRAME_SAMPLES])
    }
}

/// Pushes a fixed list of frames each time capture starts.
pub struct ScriptedCapture {
    pub levels: Vec<f32>,
}

impl CaptureDevice for ScriptedCapture {
    fn start(&mut self, frames: Sender<AudioFrame>) -> Result<(), TransportError> {
        for level in &self.levels {
            let _ = frames.try_send(AudioFrame::new(vec![*level; FRAME_SAMPLES]).unwrap());
        }
        Ok(())
    }

    fn stop(&mut self) {}
}

pub struct ChannelPlayback(pub Sender<AudioFrame>);

impl PlaybackDevice for ChannelPlayback {
    fn schedule(&mut self, frame: AudioFrame) {
        let _ = self.0.try_send(frame);
    }
}
