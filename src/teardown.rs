//! Four-step connection teardown.
//!
//! ```text
//!  initiator                                   responder
//!  ─────────                                   ─────────
//!  shutdown()                                  recv()
//!     │ ── FIN|ACK  seq=F ──────────────────────▶ │
//!     │ ◀───────────────────────── ACK ack=F+1 ── │  ClosingAsResponder
//!  ClosingAsInitiator                          shutdown()
//!     │ ◀──────────────────── FIN|ACK seq=G ───── │
//!     │ ── ACK      seq=F+1 ack=G+1 ────────────▶ │
//!  Closed                                      Closed
//! ```
//!
//! Nothing here is retransmitted: a missing, corrupt or unexpected segment
//! is fatal.  Pure ACKs left over from the data phase are skipped.

use tokio::time::Instant;

use crate::connection::{ConnError, Connection, Inbound};
use crate::packet::{flags, Packet};
use crate::sender::seq_lt;
use crate::socket::Datagram;
use crate::state::ConnectionState;

impl<D: Datagram> Connection<D> {
    /// Close the connection and release the transport.
    ///
    /// From `Established` this runs the initiator side of the teardown;
    /// after `recv` has seen the peer's FIN it runs the responder side.  On a
    /// connection that never completed a handshake it only releases the
    /// transport.  The transport is released however teardown ends.
    pub async fn shutdown(&mut self) -> Result<(), ConnError> {
        let result = match self.state {
            ConnectionState::Established => self.close_as_initiator().await,
            ConnectionState::ClosingAsResponder => self.close_as_responder().await,
            ConnectionState::Unready | ConnectionState::Bound => {
                self.state = ConnectionState::Closed;
                Ok(())
            }
            ConnectionState::Closed => Ok(()),
            ConnectionState::ClosingAsInitiator => Err(ConnError::BadState(self.state)),
            ConnectionState::Invalid => Err(ConnError::Invalid),
        };
        if self.release() {
            log::debug!("[close] transport released");
        }
        result
    }

    async fn close_as_initiator(&mut self) -> Result<(), ConnError> {
        let fin_seq = self.seq_number;
        self.send_fin(fin_seq).await?;

        let deadline = Instant::now() + self.config.handshake_timeout;
        self.teardown_segment(deadline, flags::ACK, fin_seq.wrapping_add(1), "ACK of FIN")
            .await?;
        self.seq_number = fin_seq.wrapping_add(1);
        self.state = ConnectionState::ClosingAsInitiator;
        log::debug!("[close] ← ACK of FIN");

        let deadline = Instant::now() + self.config.close_timeout;
        let peer_fin = self
            .teardown_segment(deadline, flags::FIN_ACK, self.seq_number, "peer FIN")
            .await?;
        if !self.receiver.on_fin(peer_fin.header.seq) {
            return Err(self.fail(ConnError::Protocol(format!(
                "peer FIN at seq={} but expected {}",
                peer_fin.header.seq,
                self.receiver.ack_number()
            ))));
        }
        log::debug!("[close] ← FIN seq={}", peer_fin.header.seq);

        self.send_ack().await?;
        log::debug!("[close] → ACK ack={}", self.receiver.ack_number());
        self.state = ConnectionState::Closed;
        log::info!("connection closed");
        Ok(())
    }

    /// The peer's FIN was already acknowledged by `recv`.
    async fn close_as_responder(&mut self) -> Result<(), ConnError> {
        let fin_seq = self.seq_number;
        self.send_fin(fin_seq).await?;

        let deadline = Instant::now() + self.config.handshake_timeout;
        let last = self
            .teardown_segment(deadline, flags::ACK, fin_seq.wrapping_add(1), "ACK of FIN")
            .await?;
        if last.header.seq != self.receiver.ack_number() {
            return Err(self.fail(ConnError::Protocol(format!(
                "final ACK carries seq={} but expected {}",
                last.header.seq,
                self.receiver.ack_number()
            ))));
        }
        self.seq_number = fin_seq.wrapping_add(1);
        self.state = ConnectionState::Closed;
        log::info!("connection closed by peer");
        Ok(())
    }

    async fn send_fin(&mut self, seq: u32) -> Result<(), ConnError> {
        let fin = Packet::control(
            seq,
            flags::FIN_ACK,
            self.receiver.ack_number(),
            self.receiver.window_size(),
        );
        self.transmit(&fin).await?;
        log::debug!("[close] → FIN seq={seq}");
        Ok(())
    }

    /// Wait for a segment with exactly `control` and `ack`.
    async fn teardown_segment(
        &mut self,
        deadline: Instant,
        control: u16,
        ack: u32,
        what: &'static str,
    ) -> Result<Packet, ConnError> {
        loop {
            let packet = match self.receive(Some(deadline), self.peer).await? {
                Inbound::Segment(packet, _) => packet,
                Inbound::Corrupt(e) => return Err(self.fail(e.into())),
                Inbound::TimedOut => return Err(self.fail(ConnError::Timeout(what))),
            };
            let h = packet.header;

            let pure_ack = h.is(flags::ACK) && packet.payload.is_empty();
            let lagging = seq_lt(h.ack, ack) || (control != flags::ACK && h.ack == ack);
            if pure_ack && lagging {
                log::debug!("[close] skipping stale ACK ack={}", h.ack);
                continue;
            }
            if !h.is(control) || h.ack != ack {
                return Err(self.fail(ConnError::Protocol(format!(
                    "waiting for {what}: got control={:#06x} ack={}, expected control={control:#06x} ack={ack}",
                    h.control, h.ack
                ))));
            }
            return Ok(packet);
        }
    }
}
