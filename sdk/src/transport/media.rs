use std::sync::Arc;

use async_channel::{bounded, Receiver, Sender, TrySendError};
use finchvoice_protocol::{ProtocolError, RtpPacket, RTP_HEADER_LEN};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::crypto::SecureChannel;
use crate::error::TransportError;
use crate::models::VoiceCredentials;
use crate::transport::counters::{CountersSnapshot, TransportCounters};
use crate::transport::sequencer::PacketSequencer;
use crate::transport::socket::{recv_datagram, send_datagram, MediaSocket};
use crate::voice::{AudioFrame, CaptureDevice, FrameDecoder, FrameEncoder, PlaybackDevice};

/// More consecutive receive errors than this and the socket is considered dead.
pub const MAX_CONSECUTIVE_RECEIVE_ERRORS: u32 = 32;

const CAPTURE_QUEUE_CAPACITY: usize = 16;
const DECODE_QUEUE_CAPACITY: usize = 32;
const RECEIVE_BUFFER_SIZE: usize = 4096;

/// Why a received datagram was dropped.
#[derive(Debug)]
pub(crate) enum DatagramError {
    Runt(usize),
    Malformed(ProtocolError),
    Authentication,
}

/// Split, verify and decrypt one received datagram.
pub(crate) fn open_datagram(channel: &SecureChannel, datagram: &[u8]) -> Result<Vec<u8>, DatagramError> {
    if datagram.len() <= RTP_HEADER_LEN {
        return Err(DatagramError::Runt(datagram.len()));
    }
    let packet = RtpPacket::parse(datagram).map_err(DatagramError::Malformed)?;
    channel
        .open_for_header(packet.payload, &packet.raw_header)
        .map_err(|_| DatagramError::Authentication)
}

/// Tracks a run of consecutive socket errors.
#[derive(Debug, Default)]
struct ErrorStreak(u32);

impl ErrorStreak {
    fn reset(&mut self) {
        self.0 = 0;
    }

    /// Returns `true` once the streak exceeds the limit.
    fn record(&mut self) -> bool {
        self.0 = self.0.saturating_add(1);
        self.0 > MAX_CONSECUTIVE_RECEIVE_ERRORS
    }
}

/// Encrypted RTP audio over one UDP association.
///
/// Three tasks run for the transport's lifetime: the send loop (capture
/// queue → encode → seal → send), the receive loop (recv → open → decode
/// queue) and the decode loop (decode → playback). They share nothing
/// mutable except the counters.
pub struct MediaTransport {
    ssrc: u32,
    counters: Arc<TransportCounters>,
    cancel: CancellationToken,
    closed: CancellationToken,
    capture: Box<dyn CaptureDevice>,
    capturing: bool,
    frame_tx: Sender<AudioFrame>,
}

impl MediaTransport {
    /// Start the media loops on `socket`, which must already be connected to
    /// the voice server named in `credentials`.
    pub fn new(
        credentials: VoiceCredentials,
        socket: Arc<dyn MediaSocket>,
        encoder: Box<dyn FrameEncoder>,
        decoder: Box<dyn FrameDecoder>,
        capture: Box<dyn CaptureDevice>,
        playback: Box<dyn PlaybackDevice>,
        cancel: CancellationToken,
    ) -> Self {
        let ssrc = credentials.ssrc();
        let channel = Arc::new(SecureChannel::new(credentials.secret_key()));
        let counters = Arc::new(TransportCounters::default());
        let closed = CancellationToken::new();

        let (frame_tx, frame_rx) = bounded(CAPTURE_QUEUE_CAPACITY);
        let (decode_tx, decode_rx) = bounded(DECODE_QUEUE_CAPACITY);

        tokio::spawn(Self::send_loop(
            socket.clone(),
            channel.clone(),
            ssrc,
            encoder,
            frame_rx,
            counters.clone(),
            cancel.clone(),
        ));
        tokio::spawn(Self::receive_loop(
            socket,
            channel,
            decode_tx,
            counters.clone(),
            cancel.clone(),
            closed.clone(),
        ));
        tokio::spawn(Self::decode_loop(
            decoder,
            playback,
            decode_rx,
            counters.clone(),
            cancel.clone(),
        ));

        info!(
            "[Transport] Media transport to {}:{} started, ssrc={}",
            credentials.server_ip(),
            credentials.server_port(),
            ssrc
        );

        Self {
            ssrc,
            counters,
            cancel,
            closed,
            capture,
            capturing: false,
            frame_tx,
        }
    }

    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    #[must_use]
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    pub(crate) fn shared_counters(&self) -> Arc<TransportCounters> {
        self.counters.clone()
    }

    /// Attach the capture device; the send path is active from here on.
    ///
    /// # Errors
    /// [`TransportError::AlreadyCapturing`] if capture is running,
    /// [`TransportError::Closed`] after shutdown, or the device's own error.
    pub fn start_capturing(&mut self) -> Result<(), TransportError> {
        if self.capturing {
            return Err(TransportError::AlreadyCapturing);
        }
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }

        self.capture.start(self.frame_tx.clone())?;
        self.capturing = true;
        info!("[Transport] Capture started");
        Ok(())
    }

    /// Detach the capture device. Receive and playback keep running.
    pub fn stop_capturing(&mut self) {
        if !self.capturing {
            return;
        }
        self.capture.stop();
        self.capturing = false;
        info!("[Transport] Capture stopped");
    }

    /// Resolves once the receive loop has given up on the socket.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Token cancelled when the socket is declared dead. Lets callers wait
    /// without borrowing the transport.
    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Stop capture and all loops. The socket is released once the loops exit.
    pub fn shutdown(&mut self) {
        self.stop_capturing();
        self.cancel.cancel();
    }

    async fn send_loop(
        socket: Arc<dyn MediaSocket>,
        channel: Arc<SecureChannel>,
        ssrc: u32,
        mut encoder: Box<dyn FrameEncoder>,
        frames: Receiver<AudioFrame>,
        counters: Arc<TransportCounters>,
        cancel: CancellationToken,
    ) {
        let mut sequencer = PacketSequencer::new();

        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => break,
                frame = frames.recv() => match frame {
                    Ok(frame) => frame,
                    Err(_) => break,
                },
            };

            let payload = match encoder.encode(&frame) {
                Ok(payload) => payload,
                Err(e) => {
                    counters.codec_failure();
                    debug!("[Transport] Dropping captured frame: {}", e);
                    continue;
                }
            };

            let header = sequencer.next_header(ssrc);
            let sealed = match channel.seal_for_header(&payload, &header.to_bytes()) {
                Ok(sealed) => sealed,
                Err(e) => {
                    counters.seal_failure();
                    debug!("[Transport] Dropping frame seq={}: {}", header.sequence, e);
                    continue;
                }
            };

            let datagram = RtpPacket::assemble(&header, &sealed);
            match send_datagram(socket.as_ref(), &datagram).await {
                Ok(_) => counters.packet_sent(),
                Err(e) => {
                    counters.send_error();
                    debug!("[Transport] Send error seq={}: {}", header.sequence, e);
                }
            }
        }

        debug!("[Transport] Send loop stopped");
    }

    async fn receive_loop(
        socket: Arc<dyn MediaSocket>,
        channel: Arc<SecureChannel>,
        decode_tx: Sender<Vec<u8>>,
        counters: Arc<TransportCounters>,
        cancel: CancellationToken,
        closed: CancellationToken,
    ) {
        let mut read_buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        let mut errors = ErrorStreak::default();

        loop {
            let result = tokio::select! {
                () = cancel.cancelled() => break,
                result = recv_datagram(socket.as_ref(), &mut read_buf) => result,
            };

            let len = match result {
                Ok(len) => {
                    errors.reset();
                    len
                }
                Err(e) => {
                    counters.receive_error();
                    if errors.record() {
                        error!("[Transport] Socket is failing repeatedly, closing: {}", e);
                        closed.cancel();
                        break;
                    }
                    debug!("[Transport] Receive error: {}", e);
                    continue;
                }
            };

            match open_datagram(&channel, &read_buf[..len]) {
                Ok(payload) => {
                    counters.packet_received();
                    match decode_tx.try_send(payload) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            counters.decode_queue_drop();
                            trace!("[Transport] Decode queue full, dropping packet");
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                Err(DatagramError::Runt(len)) => {
                    counters.runt_datagram();
                    trace!("[Transport] Ignoring {} byte datagram", len);
                }
                Err(DatagramError::Malformed(e)) => {
                    counters.malformed_datagram();
                    debug!("[Transport] Malformed datagram: {}", e);
                }
                Err(DatagramError::Authentication) => {
                    counters.auth_failure();
                    debug!("[Transport] Dropping datagram that failed authentication");
                }
            }
        }

        debug!("[Transport] Receive loop stopped");
    }

    async fn decode_loop(
        mut decoder: Box<dyn FrameDecoder>,
        mut playback: Box<dyn PlaybackDevice>,
        payloads: Receiver<Vec<u8>>,
        counters: Arc<TransportCounters>,
        cancel: CancellationToken,
    ) {
        loop {
            let payload = tokio::select! {
                () = cancel.cancelled() => break,
                payload = payloads.recv() => match payload {
                    Ok(payload) => payload,
                    Err(_) => break,
                },
            };

            match decoder.decode(&payload) {
                Ok(frame) => {
                    counters.frame_played();
                    playback.schedule(frame);
                }
                Err(e) => {
                    counters.codec_failure();
                    debug!("[Transport] Dropping undecodable packet: {}", e);
                }
            }
        }

        debug!("[Transport] Decode loop stopped");
    }
}

impl Drop for MediaTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use finchvoice_protocol::RtpHeader;
    use tokio::net::UdpSocket;

    use super::*;
    use crate::crypto::SecretKey;
    use crate::error::CodecError;
    use crate::voice::FRAME_SAMPLES;

    const KEY: [u8; 32] = [9; 32];
    const SSRC: u32 = 42;

    struct LevelEncoder;

    impl FrameEncoder for LevelEncoder {
        fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, CodecError> {
            Ok(frame.samples()[0].to_le_bytes().to_vec())
        }
    }

    struct LevelDecoder {
        calls: Arc<AtomicUsize>,
    }

    impl FrameDecoder for LevelDecoder {
        fn decode(&mut self, payload: &[u8]) -> Result<AudioFrame, CodecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bytes: [u8; 4] = payload
                .try_into()
                .map_err(|_| CodecError::Decode("bad length".to_string()))?;
            AudioFrame::new(vec![f32::from_le_bytes(bytes); FRAME_SAMPLES])
        }
    }

    struct ScriptedCapture {
        levels: Vec<f32>,
        started: Arc<AtomicUsize>,
    }

    impl CaptureDevice for ScriptedCapture {
        fn start(&mut self, frames: Sender<AudioFrame>) -> Result<(), TransportError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            for level in &self.levels {
                let _ = frames.try_send(AudioFrame::new(vec![*level; FRAME_SAMPLES]).unwrap());
            }
            Ok(())
        }

        fn stop(&mut self) {}
    }

    struct ChannelPlayback(Sender<AudioFrame>);

    impl PlaybackDevice for ChannelPlayback {
        fn schedule(&mut self, frame: AudioFrame) {
            let _ = self.0.try_send(frame);
        }
    }

    struct Harness {
        transport: MediaTransport,
        server: UdpSocket,
        played: Receiver<AudioFrame>,
        decode_calls: Arc<AtomicUsize>,
        capture_starts: Arc<AtomicUsize>,
    }

    async fn harness(levels: Vec<f32>) -> Harness {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.local_addr().unwrap()).await.unwrap();
        server.connect(client.local_addr().unwrap()).await.unwrap();

        let addr = server.local_addr().unwrap();
        let credentials = VoiceCredentials::new(SSRC, SecretKey::new(KEY), addr.ip().to_string(), addr.port());
        let decode_calls = Arc::new(AtomicUsize::new(0));
        let capture_starts = Arc::new(AtomicUsize::new(0));
        let (played_tx, played) = async_channel::unbounded();

        let transport = MediaTransport::new(
            credentials,
            Arc::new(client),
            Box::new(LevelEncoder),
            Box::new(LevelDecoder { calls: decode_calls.clone() }),
            Box::new(ScriptedCapture {
                levels,
                started: capture_starts.clone(),
            }),
            Box::new(ChannelPlayback(played_tx)),
            CancellationToken::new(),
        );

        Harness {
            transport,
            server,
            played,
            decode_calls,
            capture_starts,
        }
    }

    async fn recv_packet(server: &UdpSocket) -> (RtpHeader, Vec<u8>) {
        let mut buf = [0u8; 1500];
        let len = tokio::time::timeout(Duration::from_secs(2), server.recv(&mut buf))
            .await
            .expect("no packet from transport")
            .unwrap();
        let packet = RtpPacket::parse(&buf[..len]).unwrap();
        let plain = SecureChannel::new(&SecretKey::new(KEY))
            .open_for_header(packet.payload, &packet.raw_header)
            .unwrap();
        (packet.header, plain)
    }

    fn sealed_datagram(sequence: u16, level: f32) -> Vec<u8> {
        let header = RtpHeader::voice(sequence, u32::from(sequence) * 960, 7);
        let sealed = SecureChannel::new(&SecretKey::new(KEY))
            .seal_for_header(&level.to_le_bytes(), &header.to_bytes())
            .unwrap();
        RtpPacket::assemble(&header, &sealed)
    }

    #[tokio::test]
    async fn sends_sealed_packets_with_incrementing_counters() {
        let mut h = harness(vec![0.1, 0.2, 0.3]).await;
        h.transport.start_capturing().unwrap();

        for (i, level) in [0.1f32, 0.2, 0.3].iter().enumerate() {
            let (header, plain) = recv_packet(&h.server).await;
            let i = u16::try_from(i).unwrap();
            assert_eq!(header.sequence, i + 1);
            assert_eq!(header.timestamp, u32::from(i) * 960);
            assert_eq!(header.ssrc, SSRC);
            assert_eq!(plain, level.to_le_bytes());
        }
    }

    #[tokio::test]
    async fn nothing_is_sent_before_capture_starts() {
        let h = harness(vec![0.5]).await;
        let mut buf = [0u8; 64];
        let waited = tokio::time::timeout(Duration::from_millis(100), h.server.recv(&mut buf)).await;
        assert!(waited.is_err());
        assert_eq!(h.capture_starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn capture_start_stop_semantics() {
        let mut h = harness(vec![0.5]).await;

        h.transport.stop_capturing();
        h.transport.start_capturing().unwrap();
        assert!(matches!(
            h.transport.start_capturing(),
            Err(TransportError::AlreadyCapturing)
        ));
        assert_eq!(recv_packet(&h.server).await.0.sequence, 1);

        h.transport.stop_capturing();
        h.transport.stop_capturing();
        assert!(!h.transport.is_capturing());

        // Sequence state survives a stop/start cycle.
        h.transport.start_capturing().unwrap();
        assert_eq!(h.capture_starts.load(Ordering::SeqCst), 2);
        let (header, _) = recv_packet(&h.server).await;
        assert_eq!(header.sequence, 2);
        assert_eq!(header.timestamp, 960);
    }

    #[tokio::test]
    async fn bad_datagrams_are_dropped_and_loop_continues() {
        let h = harness(vec![]).await;

        // Runt: header only, then shorter.
        h.server.send(&sealed_datagram(1, 0.25)[..RTP_HEADER_LEN]).await.unwrap();
        h.server.send(&[0x80, 0x78]).await.unwrap();

        // Corrupted payload byte.
        let mut corrupted = sealed_datagram(2, 0.25);
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;
        h.server.send(&corrupted).await.unwrap();

        // Corrupted header byte changes the nonce.
        let mut wrong_nonce = sealed_datagram(3, 0.25);
        wrong_nonce[3] ^= 0x01;
        h.server.send(&wrong_nonce).await.unwrap();

        h.server.send(&sealed_datagram(4, 0.75)).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), h.played.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.samples().iter().all(|&s| (s - 0.75).abs() < f32::EPSILON));

        let counters = h.transport.counters();
        assert_eq!(counters.runt_datagrams, 2);
        assert_eq!(counters.auth_failures, 2);
        assert_eq!(counters.packets_received, 1);
        assert_eq!(counters.frames_played, 1);
        // Only the authentic packet reached the codec.
        assert_eq!(h.decode_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn decode_failure_does_not_stop_playback() {
        let h = harness(vec![]).await;

        let header = RtpHeader::voice(1, 0, 7);
        let sealed = SecureChannel::new(&SecretKey::new(KEY))
            .seal_for_header(b"not-a-level", &header.to_bytes())
            .unwrap();
        h.server.send(&RtpPacket::assemble(&header, &sealed)).await.unwrap();
        h.server.send(&sealed_datagram(2, -0.5)).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), h.played.recv())
            .await
            .unwrap()
            .unwrap();
        assert!((frame.samples()[0] + 0.5).abs() < f32::EPSILON);
        assert_eq!(h.transport.counters().codec_failures, 1);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_capture() {
        let mut h = harness(vec![]).await;
        h.transport.shutdown();
        assert!(matches!(h.transport.start_capturing(), Err(TransportError::Closed)));
    }

    /// Refuses every receive; sends succeed. `successes` lists which
    /// receive attempts (by index) hand back a runt datagram instead.
    struct RefusingSocket {
        attempts: AtomicUsize,
        successes: Vec<usize>,
    }

    impl RefusingSocket {
        fn new(successes: Vec<usize>) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                successes,
            }
        }
    }

    impl MediaSocket for RefusingSocket {
        fn poll_send(&self, _: &mut std::task::Context<'_>, buf: &[u8]) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_recv(
            &self,
            _: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.successes.contains(&attempt) {
                buf.put_slice(&[0x80]);
                return std::task::Poll::Ready(Ok(()));
            }
            std::task::Poll::Ready(Err(std::io::ErrorKind::ConnectionRefused.into()))
        }
    }

    async fn run_receive_loop(socket: Arc<RefusingSocket>) -> (Arc<TransportCounters>, CancellationToken) {
        let counters = Arc::new(TransportCounters::default());
        let closed = CancellationToken::new();
        let (decode_tx, _decode_rx) = bounded(DECODE_QUEUE_CAPACITY);

        tokio::time::timeout(
            Duration::from_secs(2),
            MediaTransport::receive_loop(
                socket,
                Arc::new(SecureChannel::new(&SecretKey::new(KEY))),
                decode_tx,
                counters.clone(),
                CancellationToken::new(),
                closed.clone(),
            ),
        )
        .await
        .expect("receive loop kept running on a dead socket");
        (counters, closed)
    }

    #[tokio::test]
    async fn dead_socket_closes_the_transport() {
        let socket = Arc::new(RefusingSocket::new(vec![]));
        let (counters, closed) = run_receive_loop(socket.clone()).await;

        assert!(closed.is_cancelled());
        let limit = u64::from(MAX_CONSECUTIVE_RECEIVE_ERRORS);
        assert_eq!(counters.snapshot().receive_errors, limit + 1);
        assert_eq!(socket.attempts.load(Ordering::SeqCst), usize::try_from(limit + 1).unwrap());
    }

    #[tokio::test]
    async fn one_good_receive_resets_the_error_streak() {
        let limit = usize::try_from(MAX_CONSECUTIVE_RECEIVE_ERRORS).unwrap();
        // Fail right up to the limit, succeed once, then fail for good.
        let socket = Arc::new(RefusingSocket::new(vec![limit]));
        let (counters, closed) = run_receive_loop(socket.clone()).await;

        assert!(closed.is_cancelled());
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.runt_datagrams, 1);
        assert_eq!(snapshot.receive_errors, u64::try_from(2 * limit + 1).unwrap());
        assert_eq!(socket.attempts.load(Ordering::SeqCst), 2 * limit + 2);
    }

    #[tokio::test]
    async fn transport_on_a_dead_socket_reports_closed() {
        let addr: std::net::SocketAddr = "127.0.0.1:9".parse().unwrap();
        let credentials = VoiceCredentials::new(SSRC, SecretKey::new(KEY), addr.ip().to_string(), addr.port());
        let (played_tx, _played) = async_channel::unbounded();
        let transport = MediaTransport::new(
            credentials,
            Arc::new(RefusingSocket::new(vec![])),
            Box::new(LevelEncoder),
            Box::new(LevelDecoder {
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Box::new(ScriptedCapture {
                levels: vec![],
                started: Arc::new(AtomicUsize::new(0)),
            }),
            Box::new(ChannelPlayback(played_tx)),
            CancellationToken::new(),
        );

        tokio::time::timeout(Duration::from_secs(2), transport.closed())
            .await
            .expect("transport never closed");
        assert!(transport.is_closed());
        assert_eq!(
            transport.counters().receive_errors,
            u64::from(MAX_CONSECUTIVE_RECEIVE_ERRORS) + 1
        );
    }

    #[test]
    fn error_streak_trips_after_limit() {
        let mut streak = ErrorStreak::default();
        for _ in 0..MAX_CONSECUTIVE_RECEIVE_ERRORS {
            assert!(!streak.record());
        }
        assert!(streak.record());

        streak.reset();
        assert!(!streak.record());
    }

    #[test]
    fn open_datagram_classifies_drops() {
        let channel = SecureChannel::new(&SecretKey::new(KEY));
        assert!(matches!(open_datagram(&channel, &[0u8; 12]), Err(DatagramError::Runt(12))));

        let mut bad_version = sealed_datagram(1, 0.0);
        bad_version[0] = 0x00;
        assert!(matches!(
            open_datagram(&channel, &bad_version),
            Err(DatagramError::Malformed(_))
        ));

        assert_eq!(
            open_datagram(&channel, &sealed_datagram(1, 0.5)).unwrap(),
            0.5f32.to_le_bytes()
        );
    }
}
