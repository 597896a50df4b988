use crate::error::ProtocolError;
use crate::io::{Reader, Writer};

/// Size of the fixed RTP header that precedes every voice datagram.
pub const RTP_HEADER_LEN: usize = 12;

/// V=2, no padding, no extension, no CSRC.
pub const RTP_VERSION_FLAGS: u8 = 0x80;

/// Payload type used for Opus voice frames.
pub const RTP_PAYLOAD_TYPE_OPUS: u8 = 0x78;

const RTP_VERSION_MASK: u8 = 0xC0;

/// Fixed 12-byte RTP header.
///
/// Layout: `[flags: u8][payload_type: u8][sequence: u16][timestamp: u32][ssrc: u32]`,
/// all multi-byte fields big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version_flags: u8,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header for an outgoing Opus voice frame.
    #[must_use]
    pub fn voice(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version_flags: RTP_VERSION_FLAGS,
            payload_type: RTP_PAYLOAD_TYPE_OPUS,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Encode header to its exact wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RTP_HEADER_LEN] {
        let mut w = Writer::with_capacity(RTP_HEADER_LEN);
        w.write_u8(self.version_flags);
        w.write_u8(self.payload_type);
        w.write_u16(self.sequence);
        w.write_u32(self.timestamp);
        w.write_u32(self.ssrc);

        let mut out = [0u8; RTP_HEADER_LEN];
        out.copy_from_slice(&w.into_vec());
        out
    }

    /// Decode the header from the first 12 bytes of `buf`.
    ///
    /// # Errors
    /// Returns error if `buf` is shorter than a header or the version is not 2.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(buf);
        let version_flags = r.read_u8()?;
        if version_flags & RTP_VERSION_MASK != RTP_VERSION_FLAGS {
            return Err(ProtocolError::InvalidField {
                field: "version",
                reason: format!("expected RTP version 2, flags byte 0x{:02x}", version_flags),
            });
        }

        Ok(Self {
            version_flags,
            payload_type: r.read_u8()?,
            sequence: r.read_u16()?,
            timestamp: r.read_u32()?,
            ssrc: r.read_u32()?,
        })
    }
}

/// A received voice datagram split into header and (still encrypted) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    /// Header bytes exactly as received; the nonce is derived from these.
    pub raw_header: [u8; RTP_HEADER_LEN],
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Split a datagram into header and payload.
    ///
    /// Datagrams of 12 bytes or less carry no payload and are rejected.
    ///
    /// # Errors
    /// Returns error if the datagram is too short or the header is invalid.
    pub fn parse(datagram: &'a [u8]) -> Result<Self, ProtocolError> {
        if datagram.len() <= RTP_HEADER_LEN {
            return Err(ProtocolError::PacketTooShort {
                expected: RTP_HEADER_LEN + 1,
                got: datagram.len(),
            });
        }

        let header = RtpHeader::decode(datagram)?;
        let mut r = Reader::new(datagram);
        let raw_header = r.read_array::<RTP_HEADER_LEN>()?;

        Ok(Self {
            header,
            raw_header,
            payload: r.remaining(),
        })
    }

    /// Concatenate header and sealed payload into one datagram.
    #[must_use]
    pub fn assemble(header: &RtpHeader, sealed_payload: &[u8]) -> Vec<u8> {
        let mut w = Writer::with_capacity(RTP_HEADER_LEN + sealed_payload.len());
        w.write_bytes(&header.to_bytes());
        w.write_bytes(sealed_payload);
        w.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE_HEADER: [u8; 12] = [
        0x80, 0x78, 0x00, 0x01, 0x00, 0x00, 0x03, 0xC0, 0x00, 0x00, 0x00, 0x2A,
    ];

    #[test]
    fn encodes_voice_header() {
        let header = RtpHeader::voice(1, 960, 42);
        assert_eq!(header.to_bytes(), EXAMPLE_HEADER);
    }

    #[test]
    fn parses_example_datagram() {
        let mut datagram = EXAMPLE_HEADER.to_vec();
        datagram.extend_from_slice(&[0xAB; 20]);

        let packet = RtpPacket::parse(&datagram).unwrap();
        assert_eq!(packet.header.sequence, 1);
        assert_eq!(packet.header.timestamp, 960);
        assert_eq!(packet.header.ssrc, 42);
        assert_eq!(packet.header.payload_type, RTP_PAYLOAD_TYPE_OPUS);
        assert_eq!(packet.raw_header, EXAMPLE_HEADER);
        assert_eq!(packet.payload.len(), 20);
    }

    #[test]
    fn rejects_header_only_and_shorter_datagrams() {
        for len in [0, 1, 11, 12] {
            let datagram = vec![0x80; len];
            assert!(matches!(
                RtpPacket::parse(&datagram),
                Err(ProtocolError::PacketTooShort { got, .. }) if got == len
            ));
        }
    }

    #[test]
    fn rejects_non_rtp_version() {
        let mut datagram = EXAMPLE_HEADER.to_vec();
        datagram[0] = 0x40;
        datagram.push(0);
        assert!(matches!(
            RtpPacket::parse(&datagram),
            Err(ProtocolError::InvalidField { field: "version", .. })
        ));
    }

    #[test]
    fn preserves_received_flags_verbatim() {
        // Marker bit and extension flag must survive so the nonce matches the sender's.
        let mut datagram = EXAMPLE_HEADER.to_vec();
        datagram[0] = 0x90;
        datagram[1] = 0xF8;
        datagram.push(0x01);

        let packet = RtpPacket::parse(&datagram).unwrap();
        assert_eq!(packet.header.to_bytes(), packet.raw_header);
    }

    #[test]
    fn assemble_prefixes_header() {
        let header = RtpHeader::voice(0xFFFF, u32::MAX, 7);
        let datagram = RtpPacket::assemble(&header, &[1, 2, 3]);
        assert_eq!(datagram.len(), RTP_HEADER_LEN + 3);
        assert_eq!(&datagram[..RTP_HEADER_LEN], &header.to_bytes());
        assert_eq!(&datagram[RTP_HEADER_LEN..], &[1, 2, 3]);
    }
}
