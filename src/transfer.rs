//! Reliable data transfer: the send and receive engines.
//!
//! # Sending
//!
//! `send` pushes one application buffer through a [`SendWindow`] in rounds:
//!
//! ```text
//!            ┌───────────────────────────────────────────────┐
//!            ▼                                               │
//!      ┌──────────┐ peer window 0 ┌─────────────┐            │
//!  ──▶ │ Transmit │──────────────▶│ ProbeWindow │────────────┤
//!      └──────────┘               └─────────────┘            │
//!        │ batch of min(peer window, cwnd, remaining)        │
//!        │ then collect ACKs                                 │
//!        ├── all confirmed ──────────────────────────────────┤
//!        │                                                   │
//!        │ 3rd duplicate ACK / ACK timeout ┌────────────┐    │
//!        └────────────────────────────────▶│ Retransmit │────┘
//!                                          └────────────┘
//!                             rewind to first unconfirmed byte,
//!                             adjust cwnd/ssthresh
//! ```
//!
//! Every advancing ACK grows the congestion window and restarts the ACK
//! deadline.  `send` gives up with [`ConnError::MaxRetriesExceeded`] after
//! [`Config::max_retries`] consecutive rounds without progress, or as many
//! unanswered window probes.
//!
//! # Receiving
//!
//! `recv` accepts only in-sequence segments, answers every data segment with
//! a cumulative ACK (a duplicate when the segment was discarded), and
//! returns once the caller's buffer can be filled, the receive buffer is
//! full, or a timeout passes with data buffered.  A peer FIN is acknowledged
//! at once and ends the stream: later calls drain what is left, then
//! return `Ok(0)`.
//!
//! [`Config::max_retries`]: crate::config::Config::max_retries

use tokio::time::Instant;

use crate::config::MSS;
use crate::connection::{ConnError, Connection, Inbound};
use crate::packet::{flags, Header, Packet};
use crate::receiver::Accept;
use crate::sender::{AckEvent, Segment, SendWindow};
use crate::socket::Datagram;
use crate::state::ConnectionState;

/// Why a round ended without every segment confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loss {
    TripleDuplicate,
    Timeout,
}

/// Phases of the send loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Transmit,
    ProbeWindow,
    Retransmit(Loss),
}

impl<D: Datagram> Connection<D> {
    // -----------------------------------------------------------------------
    // Send
    // -----------------------------------------------------------------------

    /// Deliver all of `data` to the peer.  Returns `data.len()` once every
    /// byte has been acknowledged.
    pub async fn send(&mut self, data: &[u8]) -> Result<usize, ConnError> {
        self.ensure(ConnectionState::can_send)?;
        if data.is_empty() {
            return Ok(0);
        }

        let mut window = SendWindow::new(self.seq_number, data.len());
        let mut step = Step::Transmit;
        let mut stalled = 0u32;

        while !window.is_complete() {
            step = match step {
                Step::Transmit if self.peer_window == 0 => Step::ProbeWindow,
                Step::Transmit => {
                    let confirmed = window.acked();
                    let usable = (self.peer_window as usize)
                        .min(self.congestion.cwnd() as usize)
                        .min(window.remaining());
                    let resend_below = window.highest_sent();
                    for seg in window.plan_batch(usable) {
                        self.transmit_segment(&seg, data).await?;
                        if seg.offset < resend_below {
                            self.stats.retransmissions += 1;
                        }
                    }
                    let next = self.collect_acks(&mut window).await?;
                    if window.acked() > confirmed {
                        stalled = 0;
                    }
                    next
                }
                Step::ProbeWindow => {
                    self.probe_window(window.unacked_seq()).await?;
                    Step::Transmit
                }
                Step::Retransmit(cause) => {
                    stalled += 1;
                    if stalled >= self.config.max_retries {
                        return Err(self.fail(ConnError::MaxRetriesExceeded(stalled)));
                    }
                    match cause {
                        Loss::TripleDuplicate => {
                            self.congestion.on_fast_retransmit();
                            self.stats.fast_retransmits += 1;
                        }
                        Loss::Timeout => {
                            self.congestion.on_timeout();
                            self.stats.timeouts += 1;
                        }
                    }
                    log::warn!(
                        "[send] {cause:?}: resending from seq={} (cwnd={} ssthresh={})",
                        window.unacked_seq(),
                        self.congestion.cwnd(),
                        self.congestion.ssthresh()
                    );
                    window.rewind();
                    Step::Transmit
                }
            };
        }

        self.seq_number = window.unacked_seq();
        Ok(data.len())
    }

    async fn transmit_segment(&mut self, seg: &Segment, data: &[u8]) -> Result<(), ConnError> {
        let packet = Packet {
            header: Header::new(
                seg.end_seq,
                flags::ACK,
                seg.len as u32,
                self.receiver.ack_number(),
                self.receiver.window_size(),
            ),
            payload: data[seg.offset..seg.end()].to_vec(),
        };
        self.transmit(&packet).await?;
        self.stats.bytes_sent += seg.len as u64;
        log::debug!("[send] → DATA seq={} len={}", seg.end_seq, seg.len);
        Ok(())
    }

    /// Wait for the current batch to be confirmed.
    ///
    /// The deadline restarts whenever an ACK advances the window.  Corrupt
    /// datagrams and segments that are not pure ACKs are dropped without
    /// touching it.
    async fn collect_acks(&mut self, window: &mut SendWindow) -> Result<Step, ConnError> {
        let mut deadline = Instant::now() + self.config.ack_timeout;

        while !window.batch_done() {
            let packet = match self.receive(Some(deadline), self.peer).await? {
                Inbound::TimedOut => return Ok(Step::Retransmit(Loss::Timeout)),
                Inbound::Corrupt(e) => {
                    log::warn!("[send] dropped corrupt segment: {e}");
                    continue;
                }
                Inbound::Segment(packet, _) => packet,
            };
            let h = packet.header;
            if !h.is(flags::ACK) || !packet.payload.is_empty() {
                log::debug!("[send] ignoring control={:#06x} len={}", h.control, h.data_len);
                continue;
            }

            match window.on_ack(h.ack) {
                AckEvent::Advanced { bytes, segments } => {
                    self.peer_window = u32::from(h.window);
                    self.congestion.on_ack();
                    deadline = Instant::now() + self.config.ack_timeout;
                    log::debug!(
                        "[send] ← ACK ack={} (+{bytes} bytes, {segments} segs) win={} cwnd={}",
                        h.ack,
                        h.window,
                        self.congestion.cwnd()
                    );
                }
                AckEvent::Duplicate { count } => {
                    self.peer_window = u32::from(h.window);
                    log::debug!("[send] ← dup ACK ack={} #{count}", h.ack);
                }
                AckEvent::TripleDuplicate => {
                    self.peer_window = u32::from(h.window);
                    return Ok(Step::Retransmit(Loss::TripleDuplicate));
                }
                event @ (AckEvent::Stale | AckEvent::Unsent) => {
                    log::debug!("[send] ← ACK ack={} ignored ({event:?})", h.ack);
                }
            }
        }
        Ok(Step::Transmit)
    }

    /// Send zero-length probes at `seq` until the peer advertises room.
    async fn probe_window(&mut self, seq: u32) -> Result<(), ConnError> {
        let mut unanswered = 0u32;
        loop {
            let probe = Packet::control(
                seq,
                flags::ACK,
                self.receiver.ack_number(),
                self.receiver.window_size(),
            );
            self.transmit(&probe).await?;
            self.stats.window_probes += 1;
            log::debug!("[send] → PROBE seq={seq}");

            let deadline = Instant::now() + self.config.ack_timeout;
            let mut heard = false;
            loop {
                let packet = match self.receive(Some(deadline), self.peer).await? {
                    Inbound::TimedOut => break,
                    Inbound::Corrupt(_) => continue,
                    Inbound::Segment(packet, _) => packet,
                };
                if !packet.header.is(flags::ACK) || !packet.payload.is_empty() {
                    continue;
                }
                heard = true;
                self.peer_window = u32::from(packet.header.window);
                if self.peer_window > 0 {
                    log::debug!("[send] ← window reopened to {}", self.peer_window);
                    return Ok(());
                }
            }

            if heard {
                unanswered = 0;
            } else {
                unanswered += 1;
                if unanswered >= self.config.max_retries {
                    return Err(self.fail(ConnError::MaxRetriesExceeded(unanswered)));
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Receive
    // -----------------------------------------------------------------------

    /// Read in-order bytes into `buf`.
    ///
    /// Returns the number of bytes copied.  `Ok(0)` means the peer has closed
    /// and everything it sent has been read (or `buf` is empty).
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ConnError> {
        self.ensure(ConnectionState::can_recv)?;
        if buf.is_empty() {
            return Ok(0);
        }
        if self.state == ConnectionState::ClosingAsResponder {
            return Ok(self.receiver.read(buf));
        }

        loop {
            if self.receiver.buffered() >= buf.len() || self.receiver.is_full() {
                return Ok(self.receiver.read(buf));
            }

            let deadline = Instant::now() + self.config.ack_timeout;
            let packet = match self.receive(Some(deadline), self.peer).await? {
                Inbound::TimedOut => {
                    if self.receiver.buffered() > 0 {
                        return Ok(self.receiver.read(buf));
                    }
                    if self.receiver.window_reopened() {
                        log::debug!("[recv] → window update {}", self.receiver.window_size());
                    } else {
                        log::debug!("[recv] → idle ACK ack={}", self.receiver.ack_number());
                    }
                    self.send_ack().await?;
                    continue;
                }
                Inbound::Corrupt(e) => {
                    log::warn!("[recv] dropped corrupt segment: {e}");
                    continue;
                }
                Inbound::Segment(packet, _) => packet,
            };
            let h = packet.header;

            if h.is(flags::FIN_ACK) {
                if !self.receiver.on_fin(h.seq) {
                    log::debug!("[recv] ← FIN seq={} out of order", h.seq);
                    self.send_ack().await?;
                    continue;
                }
                self.send_ack().await?;
                self.state = ConnectionState::ClosingAsResponder;
                log::info!("peer closed; {} bytes left to read", self.receiver.buffered());
                return Ok(self.receiver.read(buf));
            }
            if !h.is(flags::ACK) {
                log::debug!("[recv] ignoring control={:#06x}", h.control);
                continue;
            }

            let len = packet.payload.len();
            let outcome = if len > MSS {
                Accept::NoRoom
            } else {
                self.receiver.on_segment(packet.start_seq(), &packet.payload)
            };
            match outcome {
                Accept::InSequence => {
                    self.stats.bytes_received += len as u64;
                    log::debug!("[recv] ← DATA seq={} len={len}", h.seq);
                }
                Accept::OutOfSequence | Accept::NoRoom => {
                    log::debug!(
                        "[recv] ← DATA seq={} len={len} discarded ({outcome:?}), expecting {}",
                        h.seq,
                        self.receiver.ack_number()
                    );
                }
            }
            self.send_ack().await?;
        }
    }
}
