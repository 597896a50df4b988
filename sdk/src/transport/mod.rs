pub mod counters;
pub mod media;
pub mod sequencer;
pub mod socket;

pub use counters::{CountersSnapshot, TransportCounters};
pub use media::{MediaTransport, MAX_CONSECUTIVE_RECEIVE_ERRORS};
pub use sequencer::PacketSequencer;
pub use socket::{MediaSocket, SocketLayer};
