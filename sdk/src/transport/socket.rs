use std::future::poll_fn;
use std::io;
use std::task::{Context, Poll};

use tokio::io::ReadBuf;
use tokio::net::UdpSocket;

/// Connected datagram socket the media loops run on.
///
/// Shaped after the poll methods of [`UdpSocket`] so a socket can be wrapped
/// and boxed, for instance to shape or tunnel the media traffic.
pub trait MediaSocket: Send + Sync + 'static {
    fn poll_send(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>>;

    fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>>;
}

impl MediaSocket for UdpSocket {
    fn poll_send(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        UdpSocket::poll_send(self, cx, buf)
    }

    fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        UdpSocket::poll_recv(self, cx, buf)
    }
}

/// Wraps the negotiated UDP socket before the media loops take it over.
pub type SocketLayer = Box<dyn FnOnce(UdpSocket) -> Box<dyn MediaSocket> + Send>;

pub(crate) async fn send_datagram(socket: &dyn MediaSocket, buf: &[u8]) -> io::Result<usize> {
    poll_fn(|cx| socket.poll_send(cx, buf)).await
}

pub(crate) async fn recv_datagram(socket: &dyn MediaSocket, buf: &mut [u8]) -> io::Result<usize> {
    let mut read_buf = ReadBuf::new(buf);
    poll_fn(|cx| socket.poll_recv(cx, &mut read_buf)).await?;
    Ok(read_buf.filled().len())
}
