use std::time::Duration;

use finchvoice_protocol::ip_discovery::{decode_response, encode_request, DiscoveredAddress};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::HandshakeError;

pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Learn our externally visible address for `ssrc` over the connected
/// session socket.
///
/// # Errors
/// Returns [`HandshakeError::DiscoveryTimeout`] if no valid response arrives
/// in time, or the socket error.
pub async fn discover_external_address(socket: &UdpSocket, ssrc: u32) -> Result<DiscoveredAddress, HandshakeError> {
    socket.send(&encode_request(ssrc)).await?;

    tokio::time::timeout(DISCOVERY_TIMEOUT, read_response(socket))
        .await
        .map_err(|_| HandshakeError::DiscoveryTimeout(DISCOVERY_TIMEOUT))?
}

async fn read_response(socket: &UdpSocket) -> Result<DiscoveredAddress, HandshakeError> {
    let mut read_buf = [0u8; 256];
    loop {
        let len = socket.recv(&mut read_buf).await?;
        match decode_response(&read_buf[..len]) {
            Ok(address) => return Ok(address),
            Err(e) => debug!("[Voice gateway] Ignoring datagram during IP discovery: {}", e),
        }
    }
}
