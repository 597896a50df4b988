//! UDP IP discovery datagrams.
//!
//! Layout (74 bytes): type `u16`, length `u16` (always 70), ssrc `u32`,
//! 64-byte NUL-padded address, port `u16`. All integers big-endian.

use crate::error::ProtocolError;
use crate::io::{Reader, Writer};

pub const IP_DISCOVERY_LEN: usize = 74;
pub const IP_DISCOVERY_BODY_LEN: u16 = 70;
pub const IP_DISCOVERY_REQUEST: u16 = 0x1;
pub const IP_DISCOVERY_RESPONSE: u16 = 0x2;

const ADDRESS_LEN: usize = 64;

/// Build the request that asks the voice server for our public address.
#[must_use]
pub fn encode_request(ssrc: u32) -> Vec<u8> {
    let mut writer = Writer::with_capacity(IP_DISCOVERY_LEN);
    writer.write_u16(IP_DISCOVERY_REQUEST);
    writer.write_u16(IP_DISCOVERY_BODY_LEN);
    writer.write_u32(ssrc);
    writer.write_zeros(ADDRESS_LEN);
    writer.write_u16(0);
    writer.into_vec()
}

/// Our externally visible address as reported by the voice server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAddress {
    pub ssrc: u32,
    pub address: String,
    pub port: u16,
}

/// Parse a discovery response.
///
/// # Errors
/// Returns error if the datagram is short, is not a response, or carries
/// an address that is not UTF-8.
pub fn decode_response(data: &[u8]) -> Result<DiscoveredAddress, ProtocolError> {
    if data.len() < IP_DISCOVERY_LEN {
        return Err(ProtocolError::PacketTooShort {
            expected: IP_DISCOVERY_LEN,
            got: data.len(),
        });
    }

    let mut reader = Reader::new(data);
    let kind = reader.read_u16()?;
    if kind != IP_DISCOVERY_RESPONSE {
        return Err(ProtocolError::UnexpectedPacketType(kind));
    }
    let _length = reader.read_u16()?;
    let ssrc = reader.read_u32()?;
    let raw = reader.read_bytes(ADDRESS_LEN)?;
    let port = reader.read_u16()?;

    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let address = std::str::from_utf8(&raw[..end])
        .map_err(|e| ProtocolError::InvalidField {
            field: "address",
            reason: e.to_string(),
        })?
        .to_string();
    if address.is_empty() {
        return Err(ProtocolError::MissingField("address"));
    }

    Ok(DiscoveredAddress {
        ssrc,
        address,
        port,
    })
}
