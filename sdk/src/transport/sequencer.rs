use finchvoice_protocol::RtpHeader;

use crate::voice::FRAME_SAMPLES;

/// Timestamp advance per 20 ms frame.
#[allow(clippy::cast_possible_truncation)]
const TIMESTAMP_STEP: u32 = FRAME_SAMPLES as u32;

/// Sequence and timestamp state for outgoing packets. Owned by the send path.
///
/// The sequence number is bumped before each packet and the timestamp after,
/// so the first packet goes out with `sequence = 1, timestamp = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketSequencer {
    sequence: u16,
    timestamp: u32,
}

impl PacketSequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from explicit counter values.
    #[must_use]
    pub fn starting_at(sequence: u16, timestamp: u32) -> Self {
        Self { sequence, timestamp }
    }

    /// Header for the next packet. Both counters wrap modulo their width.
    pub fn next_header(&mut self, ssrc: u32) -> RtpHeader {
        self.sequence = self.sequence.wrapping_add(1);
        let header = RtpHeader::voice(self.sequence, self.timestamp, ssrc);
        self.timestamp = self.timestamp.wrapping_add(TIMESTAMP_STEP);
        header
    }
}
