use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session diagnostics, updated from the transport loops.
#[derive(Debug, Default)]
pub struct TransportCounters {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    frames_played: AtomicU64,
    auth_failures: AtomicU64,
    codec_failures: AtomicU64,
    seal_failures: AtomicU64,
    runt_datagrams: AtomicU64,
    malformed_datagrams: AtomicU64,
    decode_queue_drops: AtomicU64,
    send_errors: AtomicU64,
    receive_errors: AtomicU64,
}

/// Point-in-time copy of [`TransportCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub frames_played: u64,
    pub auth_failures: u64,
    pub codec_failures: u64,
    pub seal_failures: u64,
    pub runt_datagrams: u64,
    pub malformed_datagrams: u64,
    pub decode_queue_drops: u64,
    pub send_errors: u64,
    pub receive_errors: u64,
}

macro_rules! bump {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl TransportCounters {
    bump! {
        packet_sent => packets_sent,
        packet_received => packets_received,
        frame_played => frames_played,
        auth_failure => auth_failures,
        codec_failure => codec_failures,
        seal_failure => seal_failures,
        runt_datagram => runt_datagrams,
        malformed_datagram => malformed_datagrams,
        decode_queue_drop => decode_queue_drops,
        send_error => send_errors,
        receive_error => receive_errors,
    }

    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            frames_played: self.frames_played.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            codec_failures: self.codec_failures.load(Ordering::Relaxed),
            seal_failures: self.seal_failures.load(Ordering::Relaxed),
            runt_datagrams: self.runt_datagrams.load(Ordering::Relaxed),
            malformed_datagrams: self.malformed_datagrams.load(Ordering::Relaxed),
            decode_queue_drops: self.decode_queue_drops.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}
