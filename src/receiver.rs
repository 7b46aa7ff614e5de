//! Receive-side state machine.
//!
//! [`Receiver`] owns the connection's bounded receive buffer:
//!
//! - Only **in-sequence** segments are accepted (their first byte is
//!   `rcv_nxt`).
//! - Out-of-sequence or duplicate segments are **discarded**; there is no
//!   reordering buffer.  The caller answers them with a duplicate ACK of the
//!   unchanged [`Receiver::ack_number`].
//! - A segment that would overflow the buffer is discarded the same way.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;

/// What happened to an inbound data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// Appended; `rcv_nxt` advanced by the payload length.
    InSequence,
    /// Wrong position; nothing buffered.
    OutOfSequence,
    /// In position but larger than the free space.
    NoRoom,
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct Receiver {
    /// Next expected sequence number (`RCV.NXT`).
    rcv_nxt: u32,

    /// In-order payload bytes not yet handed to the application.
    buffer: VecDeque<u8>,

    capacity: usize,

    /// Highest number of bytes ever buffered at once.
    fill_level: usize,

    /// Window carried by the most recent outbound ACK.
    last_advertised: u16,
}

impl Receiver {
    /// Create an empty receiver whose buffer holds `capacity` bytes.
    ///
    /// `capacity` must fit the 16-bit window field; [`crate::config::Config`]
    /// validates this.
    pub fn new(capacity: usize) -> Self {
        Self {
            rcv_nxt: 0,
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            fill_level: 0,
            last_advertised: 0,
        }
    }

    /// Set `RCV.NXT` once the handshake has fixed the peer's numbering.
    pub fn synchronize(&mut self, rcv_nxt: u32) {
        self.rcv_nxt = rcv_nxt;
    }

    /// Process an inbound segment whose first byte is `start`.
    pub fn on_segment(&mut self, start: u32, payload: &[u8]) -> Accept {
        if start != self.rcv_nxt {
            return Accept::OutOfSequence;
        }
        if payload.len() > self.free() {
            return Accept::NoRoom;
        }
        self.buffer.extend(payload.iter().copied());
        self.rcv_nxt = self.rcv_nxt.wrapping_add(payload.len() as u32);
        self.fill_level = self.fill_level.max(self.buffer.len());
        Accept::InSequence
    }

    /// Advance `RCV.NXT` past a received FIN (which consumes one sequence
    /// number).  Returns `false` if the FIN is not at `rcv_nxt`.
    pub fn on_fin(&mut self, fin_seq: u32) -> bool {
        if fin_seq != self.rcv_nxt {
            return false;
        }
        self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        true
    }

    /// Cumulative ACK number for the next outbound segment (`RCV.NXT`).
    pub fn ack_number(&self) -> u32 {
        self.rcv_nxt
    }

    /// Free buffer space, as advertised in outbound segments.
    pub fn window_size(&self) -> u16 {
        self.free() as u16
    }

    /// Record the window carried by an ACK that was just sent.
    pub fn advertised(&mut self, window: u16) {
        self.last_advertised = window;
    }

    /// `true` once the free window is larger than what the peer last heard.
    pub fn window_reopened(&self) -> bool {
        self.window_size() > self.last_advertised
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub fn fill_level(&self) -> usize {
        self.fill_level
    }

    /// Copy up to `buf.len()` in-order bytes into `buf`, removing them from
    /// the buffer.  Returns the number of bytes copied.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.buffer.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.buffer.drain(..n)) {
            *dst = src;
        }
        n
    }

    fn free(&self) -> usize {
        self.capacity.saturating_sub(self.buffer.len())
    }
}
