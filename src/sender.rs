//! Send-side state: sliding window and congestion control.
//!
//! [`SendWindow`] tracks one application buffer while it is being pushed
//! through the network.  It partitions the buffer into segments of at most
//! [`MSS`] bytes, keeps the outstanding ones in a deque, and classifies each
//! inbound acknowledgement.  [`CongestionControl`] owns `cwnd` and
//! `ssthresh` and reacts to the three events the engine reports: an
//! advancing ACK, a triple duplicate ACK, and a timeout.
//!
//! # Sequence-number layout
//!
//! ```text
//!  base_seq   acked          next        highest_sent       total
//!     │         │              │               │               │
//!  ───┼─────────┼──────────────┼───────────────┼───────────────┼──▶ offset
//!     │ confirmed │ <─ in flight ─▶│ (sent before a rewind) │ unsent
//! ```
//!
//! A segment covering offsets `[o, o + len)` is stamped with sequence number
//! `base_seq + o + len`, the position it advances the stream past.  ACKs are
//! cumulative: `ack = base_seq + k` confirms the first `k` bytes.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;

use crate::config::MSS;

/// Duplicate ACKs that trigger a fast retransmit.
pub const DUP_ACK_THRESHOLD: u32 = 3;

/// Returns `true` when sequence number `a` is strictly before `b` in
/// wrap-around space.
#[inline]
pub(crate) fn seq_lt(a: u32, b: u32) -> bool {
    let d = b.wrapping_sub(a);
    d != 0 && d <= u32::MAX / 2
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// Descriptor of one data segment carved out of the application buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Offset of the first payload byte within the application buffer.
    pub offset: usize,
    /// Payload length, `1..=MSS`.
    pub len: usize,
    /// Sequence number stamped on the wire.
    pub end_seq: u32,
}

impl Segment {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Classification of an inbound acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckEvent {
    /// New bytes confirmed.
    Advanced { bytes: usize, segments: usize },
    /// Repeats the previous ack number; `count` consecutive repeats so far.
    Duplicate { count: u32 },
    /// The [`DUP_ACK_THRESHOLD`]th consecutive repeat.
    TripleDuplicate,
    /// Behind what is already confirmed.
    Stale,
    /// Claims bytes that were never transmitted.
    Unsent,
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Sliding-window state for one `send` call.
#[derive(Debug)]
pub struct SendWindow {
    base_seq: u32,
    total: usize,
    /// Bytes confirmed by the peer (left window edge).
    acked: usize,
    /// Next byte to transmit.
    next: usize,
    highest_sent: usize,
    /// Segments transmitted in the current batch and not yet confirmed,
    /// ordered by offset (front = oldest).
    outstanding: VecDeque<Segment>,
    last_ack: u32,
    dup_acks: u32,
}

impl SendWindow {
    /// Track `total` bytes whose first byte follows sequence number `base_seq`.
    pub fn new(base_seq: u32, total: usize) -> Self {
        Self {
            base_seq,
            total,
            acked: 0,
            next: 0,
            highest_sent: 0,
            outstanding: VecDeque::new(),
            last_ack: base_seq,
            dup_acks: 0,
        }
    }

    /// Carve up to `usable` bytes starting at the transmit position into
    /// full-size segments plus at most one partial tail, and mark them
    /// outstanding.
    pub fn plan_batch(&mut self, usable: usize) -> Vec<Segment> {
        let end = self.next.saturating_add(usable).min(self.total);
        let mut batch = Vec::with_capacity((end - self.next).div_ceil(MSS));
        while self.next < end {
            let len = MSS.min(end - self.next);
            let seg = Segment {
                offset: self.next,
                len,
                end_seq: self.seq_at(self.next + len),
            };
            self.outstanding.push_back(seg);
            batch.push(seg);
            self.next += len;
        }
        self.highest_sent = self.highest_sent.max(self.next);
        batch
    }

    /// Classify a cumulative ACK and slide the window if it advances.
    pub fn on_ack(&mut self, ack: u32) -> AckEvent {
        if ack == self.last_ack {
            self.dup_acks += 1;
            return if self.dup_acks == DUP_ACK_THRESHOLD {
                AckEvent::TripleDuplicate
            } else {
                AckEvent::Duplicate {
                    count: self.dup_acks,
                }
            };
        }
        if !seq_lt(self.last_ack, ack) {
            return AckEvent::Stale;
        }
        let offset = ack.wrapping_sub(self.base_seq) as usize;
        if offset > self.highest_sent {
            return AckEvent::Unsent;
        }

        let bytes = offset - self.acked;
        self.acked = offset;
        self.last_ack = ack;
        self.dup_acks = 0;
        // Bytes sent before a rewind may be confirmed ahead of the resend.
        self.next = self.next.max(offset);

        let mut segments = 0;
        while let Some(front) = self.outstanding.front() {
            if front.end() > offset {
                break;
            }
            self.outstanding.pop_front();
            segments += 1;
        }
        AckEvent::Advanced { bytes, segments }
    }

    /// Forget the in-flight batch and resume transmitting from the last
    /// confirmed byte.
    pub fn rewind(&mut self) {
        self.next = self.acked;
        self.outstanding.clear();
        self.dup_acks = 0;
    }

    /// `true` when every segment of the current batch is confirmed.
    pub fn batch_done(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.acked >= self.total
    }

    pub fn acked(&self) -> usize {
        self.acked
    }

    pub fn remaining(&self) -> usize {
        self.total - self.next
    }

    /// One past the furthest byte ever transmitted.
    pub fn highest_sent(&self) -> usize {
        self.highest_sent
    }

    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }

    /// Sequence number of the first unconfirmed byte.
    pub fn unacked_seq(&self) -> u32 {
        self.seq_at(self.acked)
    }

    fn seq_at(&self, offset: usize) -> u32 {
        self.base_seq.wrapping_add(offset as u32)
    }
}

// ---------------------------------------------------------------------------
// CongestionControl
// ---------------------------------------------------------------------------

/// Congestion window and slow-start threshold, both in bytes and never
/// below one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CongestionControl {
    cwnd: u32,
    ssthresh: u32,
}

impl CongestionControl {
    pub fn new(cwnd: u32, ssthresh: u32) -> Self {
        Self {
            cwnd: cwnd.max(1),
            ssthresh: ssthresh.max(1),
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd <= self.ssthresh
    }

    /// An ACK confirmed new data.
    ///
    /// Slow start adds a full MSS per ACK; congestion avoidance adds
    /// `MSS² / cwnd`, roughly one MSS per window's worth of ACKs.
    pub fn on_ack(&mut self) {
        let mss = MSS as u32;
        let increment = if self.in_slow_start() {
            mss
        } else {
            (mss * mss / self.cwnd).max(1)
        };
        self.cwnd = self.cwnd.saturating_add(increment);
    }

    /// Third duplicate ACK: halve the window and keep going.
    pub fn on_fast_retransmit(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(1);
        self.cwnd = self.cwnd / 2 + 1;
    }

    /// No ACK before the deadline: halve the threshold and restart from
    /// at most one segment.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.ssthresh / 2).max(1);
        self.cwnd = (MSS as u32).min(self.ssthresh).max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: usize = MSS;

    #[test]
    fn batch_splits_into_full_segments_and_tail() {
        let mut w = SendWindow::new(1000, 10_000);
        let batch = w.plan_batch(2 * M + 200);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], Segment { offset: 0, len: M, end_seq: 1000 + M as u32 });
        assert_eq!(batch[1].len, M);
        assert_eq!(batch[2], Segment {
            offset: 2 * M,
            len: 200,
            end_seq: 1000 + 2 * M as u32 + 200,
        });
        assert_eq!(w.in_flight(), 3);
        assert_eq!(w.remaining(), 10_000 - 2 * M - 200);
    }

    #[test]
    fn batch_never_exceeds_mss_or_buffer() {
        let mut w = SendWindow::new(0, 3 * M + 1);
        let batch = w.plan_batch(usize::MAX);
        assert!(batch.iter().all(|s| s.len <= M));
        assert_eq!(batch.iter().map(|s| s.len).sum::<usize>(), 3 * M + 1);
        assert_eq!(batch.last().map(|s| s.len), Some(1));
    }

    #[test]
    fn cumulative_ack_slides_window() {
        let mut w = SendWindow::new(0, 3 * M);
        w.plan_batch(3 * M);

        assert_eq!(
            w.on_ack(2 * M as u32),
            AckEvent::Advanced { bytes: 2 * M, segments: 2 }
        );
        assert_eq!(w.acked(), 2 * M);
        assert!(!w.batch_done());

        assert_eq!(w.on_ack(3 * M as u32), AckEvent::Advanced { bytes: M, segments: 1 });
        assert!(w.batch_done());
        assert!(w.is_complete());
    }

    #[test]
    fn two_duplicates_do_not_trigger() {
        let mut w = SendWindow::new(0, 4 * M);
        w.plan_batch(4 * M);
        w.on_ack(M as u32);
        assert_eq!(w.on_ack(M as u32), AckEvent::Duplicate { count: 1 });
        assert_eq!(w.on_ack(M as u32), AckEvent::Duplicate { count: 2 });
        assert_eq!(w.on_ack(2 * M as u32), AckEvent::Advanced { bytes: M, segments: 1 });
        assert_eq!(w.on_ack(2 * M as u32), AckEvent::Duplicate { count: 1 });
    }

    #[test]
    fn third_duplicate_triggers() {
        let mut w = SendWindow::new(0, 4 * M);
        w.plan_batch(4 * M);
        assert_eq!(w.on_ack(0), AckEvent::Duplicate { count: 1 });
        assert_eq!(w.on_ack(0), AckEvent::Duplicate { count: 2 });
        assert_eq!(w.on_ack(0), AckEvent::TripleDuplicate);
    }

    #[test]
    fn rewind_resends_from_last_confirmed_byte() {
        let mut w = SendWindow::new(500, 4 * M);
        w.plan_batch(4 * M);
        w.on_ack(500 + M as u32);
        w.rewind();

        assert_eq!(w.in_flight(), 0);
        assert_eq!(w.unacked_seq(), 500 + M as u32);
        let again = w.plan_batch(M);
        assert_eq!(again[0].offset, M);
        assert_eq!(again[0].end_seq, 500 + 2 * M as u32);
    }

    #[test]
    fn ack_for_data_sent_before_rewind_is_honoured() {
        let mut w = SendWindow::new(0, 4 * M);
        w.plan_batch(4 * M);
        w.rewind();
        w.plan_batch(M);
        assert_eq!(
            w.on_ack(3 * M as u32),
            AckEvent::Advanced { bytes: 3 * M, segments: 1 }
        );
        assert_eq!(w.remaining(), M);
    }

    #[test]
    fn stale_and_unsent_acks_ignored() {
        let mut w = SendWindow::new(100, 2 * M);
        w.plan_batch(M);
        w.on_ack(100 + M as u32);
        assert_eq!(w.on_ack(100), AckEvent::Stale);
        assert_eq!(w.on_ack(100 + 2 * M as u32), AckEvent::Unsent);
        assert_eq!(w.acked(), M);
    }

    #[test]
    fn sequence_numbers_wrap() {
        let base = u32::MAX - 10;
        let mut w = SendWindow::new(base, M);
        let batch = w.plan_batch(M);
        assert_eq!(batch[0].end_seq, base.wrapping_add(M as u32));
        assert!(matches!(
            w.on_ack(base.wrapping_add(M as u32)),
            AckEvent::Advanced { .. }
        ));
    }

    #[test]
    fn slow_start_doubles_per_round_then_grows_additively() {
        let mss = MSS as u32;
        let mut cc = CongestionControl::new(mss, 8 * mss);

        // One ACK per segment in flight: each round doubles cwnd.
        for expected in [2 * mss, 4 * mss, 8 * mss] {
            let acks = cc.cwnd() / mss;
            for _ in 0..acks {
                cc.on_ack();
            }
            assert_eq!(cc.cwnd(), expected);
        }

        // cwnd == ssthresh still counts as slow start.
        cc.on_ack();
        assert_eq!(cc.cwnd(), 9 * mss);
        assert!(!cc.in_slow_start());
        let before = cc.cwnd();
        for _ in 0..(before / mss) {
            cc.on_ack();
        }
        let grown = cc.cwnd() - before;
        assert!(grown > 0 && grown <= mss, "additive growth was {grown}");
    }

    #[test]
    fn slow_start_includes_threshold() {
        let mss = MSS as u32;
        let mut cc = CongestionControl::new(4 * mss, 4 * mss);
        cc.on_ack();
        assert_eq!(cc.cwnd(), 5 * mss);
        cc.on_ack();
        assert_eq!(cc.cwnd(), 5 * mss + mss * mss / (5 * mss));
    }

    #[test]
    fn fast_retransmit_halves_window() {
        let mut cc = CongestionControl::new(5600, 8192);
        cc.on_fast_retransmit();
        assert_eq!(cc.cwnd(), 2801);
        assert_eq!(cc.ssthresh(), 2800);
    }

    #[test]
    fn timeout_halves_threshold_and_collapses_window() {
        let mut cc = CongestionControl::new(5600, 8192);
        cc.on_timeout();
        assert_eq!(cc.ssthresh(), 4096);
        assert_eq!(cc.cwnd(), MSS as u32);

        let mut cc = CongestionControl::new(5600, 1000);
        cc.on_timeout();
        assert_eq!(cc.ssthresh(), 500);
        assert_eq!(cc.cwnd(), 500);
    }

    #[test]
    fn windows_never_reach_zero() {
        let mut cc = CongestionControl::new(0, 0);
        assert_eq!((cc.cwnd(), cc.ssthresh()), (1, 1));
        for _ in 0..5 {
            cc.on_timeout();
            cc.on_fast_retransmit();
        }
        assert!(cc.cwnd() >= 1 && cc.ssthresh() >= 1);
    }
}
