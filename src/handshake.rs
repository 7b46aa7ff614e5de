//! Three-way handshake.
//!
//! ```text
//!  initiator                                   responder
//!  ─────────                                   ─────────
//!  connect()                                   accept()
//!     │ ── SYN      seq=X ──────────────────────▶ │
//!     │ ◀───────────────── SYN|ACK seq=Y ack=X+1 ─ │
//!     │ ── ACK      seq=X+1 ack=Y+1 ────────────▶ │
//!  Established                                 Established
//! ```
//!
//! Both sides pick a random initial sequence number.  Every wait that
//! follows a local transmission is bounded by
//! [`Config::handshake_timeout`](crate::config::Config::handshake_timeout);
//! the responder's wait for the first SYN is not.  Any unexpected segment is
//! fatal; the handshake never retransmits.

use std::net::SocketAddr;

use rand::Rng;
use tokio::time::Instant;

use crate::connection::{ConnError, Connection, Inbound};
use crate::packet::{flags, Packet};
use crate::socket::Datagram;
use crate::state::{ConnectionState, Role};

/// Random ISN in `[1, 2^31)`.
fn initial_sequence_number() -> u32 {
    rand::rng().random_range(1..1u32 << 31)
}

impl<D: Datagram> Connection<D> {
    /// Actively open a connection to `remote`.
    pub async fn connect(&mut self, remote: SocketAddr) -> Result<(), ConnError> {
        self.ensure(ConnectionState::can_connect)?;

        let isn = initial_sequence_number();
        let syn = Packet::control(isn, flags::SYN, 0, self.config.initial_window);
        self.transmit_to(&syn, remote).await?;
        log::debug!("[handshake] → SYN seq={isn} to {remote}");

        let deadline = Instant::now() + self.config.handshake_timeout;
        let reply = self.handshake_segment(deadline, remote, "SYN-ACK").await?;
        let h = reply.header;
        if !h.is(flags::SYN_ACK) {
            return Err(self.fail(ConnError::Protocol(format!(
                "expected SYN-ACK, got control {:#06x}",
                h.control
            ))));
        }
        if h.ack != isn.wrapping_add(1) {
            return Err(self.fail(ConnError::Protocol(format!(
                "SYN-ACK acknowledges {} instead of {}",
                h.ack,
                isn.wrapping_add(1)
            ))));
        }
        log::debug!("[handshake] ← SYN-ACK seq={} ack={} win={}", h.seq, h.ack, h.window);

        self.seq_number = isn.wrapping_add(1);
        self.peer_window = u32::from(h.window);
        self.receiver.synchronize(h.seq.wrapping_add(1));

        let ack = Packet::control(
            self.seq_number,
            flags::ACK,
            self.receiver.ack_number(),
            self.config.initial_window,
        );
        self.transmit_to(&ack, remote).await?;
        self.receiver.advertised(self.config.initial_window);
        log::debug!("[handshake] → ACK seq={} ack={}", ack.header.seq, ack.header.ack);

        self.peer = Some(remote);
        self.role = Some(Role::Initiator);
        self.state = ConnectionState::Established;
        log::info!("connected to {remote}");
        Ok(())
    }

    /// Wait for a SYN and complete the handshake with whoever sent it.
    ///
    /// Returns the peer's address.
    pub async fn accept(&mut self) -> Result<SocketAddr, ConnError> {
        self.ensure(ConnectionState::can_accept)?;

        let (syn, client) = match self.receive(None, None).await? {
            Inbound::Segment(packet, from) => (packet, from),
            Inbound::Corrupt(e) => return Err(self.fail(e.into())),
            Inbound::TimedOut => return Err(self.fail(ConnError::Timeout("SYN"))),
        };
        if !syn.header.is(flags::SYN) {
            return Err(self.fail(ConnError::Protocol(format!(
                "expected SYN from {client}, got control {:#06x}",
                syn.header.control
            ))));
        }
        let client_isn = syn.header.seq;
        log::debug!("[handshake] ← SYN seq={client_isn} from {client}");

        let isn = initial_sequence_number();
        let syn_ack = Packet::control(
            isn,
            flags::SYN_ACK,
            client_isn.wrapping_add(1),
            self.config.initial_window,
        );
        self.transmit_to(&syn_ack, client).await?;
        log::debug!("[handshake] → SYN-ACK seq={isn} ack={}", client_isn.wrapping_add(1));

        let deadline = Instant::now() + self.config.handshake_timeout;
        let last = self.handshake_segment(deadline, client, "final ACK").await?;
        let h = last.header;
        if !h.is(flags::ACK) {
            return Err(self.fail(ConnError::Protocol(format!(
                "expected ACK, got control {:#06x}",
                h.control
            ))));
        }
        if h.seq != client_isn.wrapping_add(1) || h.ack != isn.wrapping_add(1) {
            return Err(self.fail(ConnError::Protocol(format!(
                "final ACK carries seq={} ack={}, expected seq={} ack={}",
                h.seq,
                h.ack,
                client_isn.wrapping_add(1),
                isn.wrapping_add(1)
            ))));
        }
        log::debug!("[handshake] ← ACK seq={} ack={} win={}", h.seq, h.ack, h.window);

        self.seq_number = isn.wrapping_add(1);
        self.peer_window = u32::from(h.window);
        self.receiver.synchronize(client_isn.wrapping_add(1));
        self.receiver.advertised(self.config.initial_window);
        self.peer = Some(client);
        self.role = Some(Role::Responder);
        self.state = ConnectionState::Established;
        log::info!("accepted connection from {client}");
        Ok(client)
    }

    /// One bounded handshake receive.  Corruption and silence are both fatal.
    async fn handshake_segment(
        &mut self,
        deadline: Instant,
        from: SocketAddr,
        what: &'static str,
    ) -> Result<Packet, ConnError> {
        match self.receive(Some(deadline), Some(from)).await? {
            Inbound::Segment(packet, _) => Ok(packet),
            Inbound::Corrupt(e) => Err(self.fail(e.into())),
            Inbound::TimedOut => Err(self.fail(ConnError::Timeout(what))),
        }
    }
}
