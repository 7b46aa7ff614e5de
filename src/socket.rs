//! Async datagram socket abstraction.
//!
//! [`Datagram`] is the raw, unreliable transport the protocol rides on.  It is
//! implemented for `tokio::net::UdpSocket` and for the in-memory
//! [`crate::simulator::SimSocket`].
//!
//! [`Socket`] layers the codec on top: it sends and receives whole
//! [`crate::packet::Packet`]s and reports undecodable datagrams separately
//! from I/O failures.  It knows nothing about connections.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::packet::{Packet, PacketError};

/// Receive buffer size; large enough for any UDP datagram.
const RECV_BUF_LEN: usize = 65_535;

/// An unreliable, unordered datagram transport.
pub trait Datagram: Send + Sync {
    fn send_to(
        &self,
        buf: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Datagram for UdpSocket {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, dest).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("datagram I/O failed: {0}")]
    Io(#[from] io::Error),
    /// Arrived, but is not a well-formed segment.
    #[error("undecodable datagram: {0}")]
    Packet(#[from] PacketError),
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// A packet-oriented datagram socket.
#[derive(Debug)]
pub struct Socket<D = UdpSocket> {
    /// Resolved bound address (the real port when bound to port 0).
    pub local_addr: SocketAddr,
    inner: D,
    /// Scratch space reused by every receive.
    recv_buf: Mutex<Box<[u8]>>,
}

impl Socket<UdpSocket> {
    /// Open a UDP socket on `addr`; port `0` picks an ephemeral one.
    pub async fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        Self::new(UdpSocket::bind(addr).await?)
    }
}

impl<D: Datagram> Socket<D> {
    /// Wrap an already-bound transport.
    pub fn new(inner: D) -> Result<Self, SocketError> {
        Ok(Self {
            local_addr: inner.local_addr()?,
            inner,
            recv_buf: Mutex::new(vec![0u8; RECV_BUF_LEN].into_boxed_slice()),
        })
    }

    /// Seal `packet` and send it as one datagram.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(&packet.encode(), dest).await?;
        Ok(())
    }

    /// Wait for the next datagram and verify it.
    ///
    /// A datagram that fails its length or CRC check comes back as
    /// [`SocketError::Packet`] without the sender's address.
    pub async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError> {
        let mut buf = self.recv_buf.lock().await;
        let (len, from) = self.inner.recv_from(&mut buf[..]).await?;
        Ok((Packet::decode(&buf[..len])?, from))
    }

    pub fn get_ref(&self) -> &D {
        &self.inner
    }
}
