//! Per-connection state and the plumbing shared by every protocol phase.
//!
//! A [`Connection`] owns the complete state for one logical peer-to-peer
//! session:
//! - the lifecycle state (see [`crate::state`]) and the role played in the
//!   handshake,
//! - sequence/ack counters, the peer's advertised window and the congestion
//!   control variables,
//! - the receive buffer ([`crate::receiver::Receiver`]),
//! - the datagram [`Socket`] it was created over.
//!
//! The four public operations are spread over sibling modules, each adding an
//! `impl` block: [`crate::handshake`] (`connect` / `accept`),
//! [`crate::transfer`] (`send` / `recv`) and [`crate::teardown`]
//! (`shutdown`).
//!
//! ```ignore
//! let mut conn = Connection::bind_udp("0.0.0.0:9000".parse()?).await?;
//! let peer = conn.accept().await?;
//! let mut buf = [0u8; 4096];
//! while conn.recv(&mut buf).await? > 0 { /* ... */ }
//! conn.shutdown().await?;
//! ```

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::config::{Config, ConfigError};
use crate::packet::{flags, Packet, PacketError};
use crate::receiver::Receiver;
use crate::sender::CongestionControl;
use crate::socket::{Datagram, Socket, SocketError};
use crate::state::{ConnectionState, Role};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by connection operations.
///
/// Everything except [`ConnError::BadState`] is fatal: the connection moves
/// to [`ConnectionState::Invalid`] and refuses further work.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The underlying datagram send/receive failed.
    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),
    /// A segment failed its checksum or length check where no retry exists.
    #[error("segment failed integrity check: {0}")]
    Integrity(#[from] PacketError),
    /// Flags, sequence or acknowledgement numbers inconsistent with the
    /// current state.
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("gave up after {0} retransmission rounds without progress")]
    MaxRetriesExceeded(u32),
    /// The operation is not legal in the current state.
    #[error("operation not permitted in state {0}")]
    BadState(ConnectionState),
    /// An earlier fatal error poisoned the connection.
    #[error("connection is invalid after an earlier fatal error")]
    Invalid,
    #[error("requested local address {requested} but transport is bound to {actual}")]
    AddrMismatch {
        requested: SocketAddr,
        actual: SocketAddr,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<SocketError> for ConnError {
    fn from(e: SocketError) -> Self {
        match e {
            SocketError::Io(e) => Self::Transport(e),
            SocketError::Packet(e) => Self::Integrity(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Counters accumulated over the life of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub segments_sent: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Data segments transmitted more than once.
    pub retransmissions: u64,
    pub fast_retransmits: u64,
    pub timeouts: u64,
    pub window_probes: u64,
    /// Inbound datagrams discarded for a bad checksum or length.
    pub corrupt_dropped: u64,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Result of waiting for one inbound segment.
#[derive(Debug)]
pub(crate) enum Inbound {
    Segment(Packet, SocketAddr),
    Corrupt(PacketError),
    TimedOut,
}

/// A reliable, ordered byte stream over a datagram transport.
pub struct Connection<D = UdpSocket> {
    pub(crate) state: ConnectionState,
    pub(crate) role: Option<Role>,
    /// `None` once the transport has been released by `shutdown`.
    socket: Option<Socket<D>>,
    local_addr: SocketAddr,
    /// Fixed when the handshake completes.
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) config: Config,
    /// Next sequence number to send (`SND.NXT`).
    pub(crate) seq_number: u32,
    /// Free space the peer last advertised.
    pub(crate) peer_window: u32,
    pub(crate) congestion: CongestionControl,
    pub(crate) receiver: Receiver,
    pub(crate) stats: Stats,
}

impl Connection<UdpSocket> {
    /// Create a UDP socket on `local_addr` and return a [`Bound`] connection
    /// over it, ready to [`accept`].
    ///
    /// [`Bound`]: ConnectionState::Bound
    /// [`accept`]: Connection::accept
    pub async fn bind_udp(local_addr: SocketAddr) -> Result<Self, ConnError> {
        let socket = Socket::bind(local_addr).await?;
        let mut conn = Self::new(socket);
        conn.bind(local_addr)?;
        Ok(conn)
    }
}

impl<D: Datagram> Connection<D> {
    /// A new [`ConnectionState::Unready`] connection with default settings.
    pub fn new(socket: Socket<D>) -> Self {
        Self::build(socket, Config::default())
    }

    /// A new connection with custom settings.
    pub fn with_config(socket: Socket<D>, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        Ok(Self::build(socket, config))
    }

    fn build(socket: Socket<D>, config: Config) -> Self {
        let mut receiver = Receiver::new(config.recv_buffer_len);
        receiver.advertised(config.initial_window);
        Self {
            state: ConnectionState::Unready,
            role: None,
            local_addr: socket.local_addr,
            socket: Some(socket),
            peer: None,
            seq_number: 0,
            peer_window: u32::from(config.initial_window),
            congestion: CongestionControl::new(config.initial_cwnd, config.initial_ssthresh),
            receiver,
            stats: Stats::default(),
            config,
        }
    }

    /// Mark the connection ready to accept on `local_addr`.
    ///
    /// The transport is already bound by the time it reaches us, so this
    /// checks that `local_addr` names it.  Port `0` and the unspecified IP
    /// match anything.
    pub fn bind(&mut self, local_addr: SocketAddr) -> Result<(), ConnError> {
        self.ensure(|s| s == ConnectionState::Unready)?;
        let actual = self.local_addr;
        let port_ok = local_addr.port() == 0 || local_addr.port() == actual.port();
        let ip_ok = local_addr.ip().is_unspecified() || local_addr.ip() == actual.ip();
        if !(port_ok && ip_ok) {
            return Err(self.fail(ConnError::AddrMismatch {
                requested: local_addr,
                actual,
            }));
        }
        self.state = ConnectionState::Bound;
        log::debug!("bound to {actual}");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn seq_number(&self) -> u32 {
        self.seq_number
    }

    pub fn ack_number(&self) -> u32 {
        self.receiver.ack_number()
    }

    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    pub fn cwnd(&self) -> u32 {
        self.congestion.cwnd()
    }

    pub fn ssthresh(&self) -> u32 {
        self.congestion.ssthresh()
    }

    /// Highest number of bytes the receive buffer has held at once.
    pub fn fill_level(&self) -> usize {
        self.receiver.fill_level()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `true` once `shutdown` has dropped the transport.
    pub fn is_released(&self) -> bool {
        self.socket.is_none()
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Refuse work on a poisoned connection or outside the allowed states.
    pub(crate) fn ensure(&self, allowed: fn(ConnectionState) -> bool) -> Result<(), ConnError> {
        match self.state {
            ConnectionState::Invalid => Err(ConnError::Invalid),
            s if allowed(s) => Ok(()),
            s => Err(ConnError::BadState(s)),
        }
    }

    /// Poison the connection and hand `err` back for propagation.
    pub(crate) fn fail(&mut self, err: ConnError) -> ConnError {
        log::warn!("fatal in state {}: {err}", self.state);
        self.state = ConnectionState::Invalid;
        err
    }

    fn socket(&self) -> Result<&Socket<D>, ConnError> {
        self.socket.as_ref().ok_or(ConnError::BadState(self.state))
    }

    /// Drop the transport.  Returns `true` if it was still held.
    pub(crate) fn release(&mut self) -> bool {
        self.socket.take().is_some()
    }

    pub(crate) async fn transmit_to(
        &mut self,
        packet: &Packet,
        dest: SocketAddr,
    ) -> Result<(), ConnError> {
        let sent = self.socket()?.send_to(packet, dest).await;
        match sent {
            Ok(()) => {
                self.stats.segments_sent += 1;
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Send `packet` to the connected peer.
    pub(crate) async fn transmit(&mut self, packet: &Packet) -> Result<(), ConnError> {
        let peer = self.peer.ok_or(ConnError::BadState(self.state))?;
        self.transmit_to(packet, peer).await
    }

    /// Wait for the next segment, optionally until `deadline`.
    ///
    /// Datagrams from anyone but `from` (when given) are skipped.  Corrupt
    /// datagrams are counted and reported, never decoded.
    pub(crate) async fn receive(
        &mut self,
        deadline: Option<Instant>,
        from: Option<SocketAddr>,
    ) -> Result<Inbound, ConnError> {
        loop {
            let socket = self.socket()?;
            let result = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, socket.recv_from()).await {
                        Ok(result) => result,
                        Err(_elapsed) => return Ok(Inbound::TimedOut),
                    }
                }
                None => socket.recv_from().await,
            };

            match result {
                Ok((packet, addr)) => {
                    if from.is_some_and(|peer| peer != addr) {
                        log::debug!("ignoring segment from stranger {addr}");
                        continue;
                    }
                    return Ok(Inbound::Segment(packet, addr));
                }
                Err(SocketError::Packet(e)) => {
                    self.stats.corrupt_dropped += 1;
                    return Ok(Inbound::Corrupt(e));
                }
                Err(SocketError::Io(e)) => return Err(self.fail(ConnError::Transport(e))),
            }
        }
    }

    /// A pure ACK reflecting the current send/receive state.
    pub(crate) fn make_ack(&self) -> Packet {
        Packet::control(
            self.seq_number,
            flags::ACK,
            self.receiver.ack_number(),
            self.receiver.window_size(),
        )
    }

    /// Send [`Self::make_ack`] and remember the window it advertised.
    pub(crate) async fn send_ack(&mut self) -> Result<(), ConnError> {
        let ack = self.make_ack();
        self.transmit(&ack).await?;
        self.receiver.advertised(ack.header.window);
        Ok(())
    }
}
