//! ARQ receive-side buffers.
//!
//! [`ArqReceiver`] implements the receiver side of selective-repeat ARQ:
//!
//! - Every `Push` inside the receive window is **acknowledged**, including
//!   duplicates, so a lost ack is repaired by the next copy.
//! - Segments at or beyond `rcv_nxt` are buffered in `buffer` (ordered by
//!   `sn`, duplicates dropped) until the gap before them is filled.
//! - The contiguous run starting at `rcv_nxt` moves into `queue`, where the
//!   reassembler picks whole messages off the front.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;

use crate::segment::Segment;
use crate::sender::seq_diff;

/// What happened to an inbound `Push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// New data, buffered.
    Accepted,
    /// Already received; acknowledged again but not stored.
    Duplicate,
    /// Beyond the receive window; dropped without an ack.
    OutOfWindow,
}

#[derive(Debug)]
pub struct ArqReceiver {
    /// Next expected sequence number.
    rcv_nxt: u32,
    /// Receive window capacity, in segments.
    rcv_wnd: u16,
    /// Out-of-order arrivals.
    buffer: VecDeque<Segment>,
    /// Contiguous segments awaiting reassembly.
    queue: VecDeque<Segment>,
    /// Pending `(sn, ts)` acknowledgements for the next flush.
    acks: Vec<(u32, u32)>,
}

impl ArqReceiver {
    pub fn new(rcv_wnd: u16) -> Self {
        Self {
            rcv_nxt: 0,
            rcv_wnd,
            buffer: VecDeque::new(),
            queue: VecDeque::new(),
            acks: Vec::new(),
        }
    }

    /// Cumulative ack to place in outbound segments.
    pub fn ack_number(&self) -> u32 {
        self.rcv_nxt
    }

    /// Free receive window to advertise.
    pub fn window_unused(&self) -> u16 {
        (self.rcv_wnd as usize).saturating_sub(self.queue.len()) as u16
    }

    /// `true` once the reassembly queue has reached the receive window.
    pub fn queue_full(&self) -> bool {
        self.queue.len() >= self.rcv_wnd as usize
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_mut(&mut self) -> &mut VecDeque<Segment> {
        &mut self.queue
    }

    pub fn queue(&self) -> &VecDeque<Segment> {
        &self.queue
    }

    /// Process an inbound `Push`.
    pub fn on_push(&mut self, segment: Segment) -> PushOutcome {
        if seq_diff(segment.sn, self.rcv_nxt.wrapping_add(self.rcv_wnd as u32)) >= 0 {
            return PushOutcome::OutOfWindow;
        }
        self.acks.push((segment.sn, segment.ts));

        if seq_diff(segment.sn, self.rcv_nxt) < 0 {
            return PushOutcome::Duplicate;
        }

        // Insert keeping `buffer` sorted; scan from the back since new data
        // usually lands at the end.
        let mut pos = self.buffer.len();
        while pos > 0 {
            let prev = &self.buffer[pos - 1];
            if prev.sn == segment.sn {
                return PushOutcome::Duplicate;
            }
            if seq_diff(segment.sn, prev.sn) > 0 {
                break;
            }
            pos -= 1;
        }
        self.buffer.insert(pos, segment);
        self.advance();
        PushOutcome::Accepted
    }

    /// Move the contiguous run at `rcv_nxt` from `buffer` into `queue`, as
    /// far as the receive window allows.
    pub fn advance(&mut self) {
        while let Some(front) = self.buffer.front() {
            if front.sn != self.rcv_nxt || self.queue_full() {
                break;
            }
            if let Some(seg) = self.buffer.pop_front() {
                self.queue.push_back(seg);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        }
    }

    /// Take the acknowledgements accumulated since the last flush.
    pub fn take_acks(&mut self) -> Vec<(u32, u32)> {
        std::mem::take(&mut self.acks)
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Command;

    fn push(sn: u32, payload: &[u8]) -> Segment {
        Segment {
            conv: 1,
            cmd: Command::Push,
            frg: 0,
            wnd: 32,
            ts: sn.wrapping_add(100),
            sn,
            una: 0,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn initial_state() {
        let r = ArqReceiver::new(8);
        assert_eq!(r.ack_number(), 0);
        assert_eq!(r.window_unused(), 8);
        assert_eq!(r.pending_acks(), 0);
    }

    #[test]
    fn in_order_segment_is_queued() {
        let mut r = ArqReceiver::new(8);
        assert_eq!(r.on_push(push(0, b"a")), PushOutcome::Accepted);
        assert_eq!(r.ack_number(), 1);
        assert_eq!(r.queued(), 1);
        assert_eq!(r.take_acks(), vec![(0, 100)]);
    }

    #[test]
    fn out_of_order_segment_waits_for_gap() {
        let mut r = ArqReceiver::new(8);
        assert_eq!(r.on_push(push(2, b"c")), PushOutcome::Accepted);
        assert_eq!(r.on_push(push(1, b"b")), PushOutcome::Accepted);
        assert_eq!(r.ack_number(), 0);
        assert_eq!(r.buffered(), 2);
        assert_eq!(r.queued(), 0);

        r.on_push(push(0, b"a"));
        assert_eq!(r.ack_number(), 3);
        let payloads: Vec<&[u8]> = r.queue().iter().map(|s| s.payload.as_slice()).collect();
        assert_eq!(payloads, vec![b"a" as &[u8], b"b", b"c"]);
    }

    #[test]
    fn duplicate_is_acked_but_not_stored() {
        let mut r = ArqReceiver::new(8);
        r.on_push(push(0, b"a"));
        r.take_acks();
        assert_eq!(r.on_push(push(0, b"a")), PushOutcome::Duplicate);
        assert_eq!(r.queued(), 1);
        assert_eq!(r.ack_number(), 1);
        assert_eq!(r.take_acks(), vec![(0, 100)]);
    }

    #[test]
    fn duplicate_out_of_order_segment_is_stored_once() {
        let mut r = ArqReceiver::new(8);
        r.on_push(push(3, b"d"));
        assert_eq!(r.on_push(push(3, b"d")), PushOutcome::Duplicate);
        assert_eq!(r.buffered(), 1);
    }

    #[test]
    fn segment_beyond_window_is_dropped_without_ack() {
        let mut r = ArqReceiver::new(4);
        assert_eq!(r.on_push(push(4, b"x")), PushOutcome::OutOfWindow);
        assert_eq!(r.pending_acks(), 0);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn queue_never_exceeds_window() {
        let mut r = ArqReceiver::new(2);
        r.on_push(push(0, b"a"));
        r.on_push(push(1, b"b"));
        assert!(r.queue_full());
        assert_eq!(r.window_unused(), 0);

        // sn 2 is inside the window but waits in the buffer while the queue is full.
        assert_eq!(r.on_push(push(2, b"c")), PushOutcome::Accepted);
        assert_eq!(r.queued(), 2);
        assert_eq!(r.buffered(), 1);

        r.queue_mut().pop_front();
        r.advance();
        assert_eq!(r.queued(), 2);
        assert_eq!(r.ack_number(), 3);
    }

    #[test]
    fn seq_wrap_around() {
        let mut r = ArqReceiver::new(8);
        r.rcv_nxt = u32::MAX;
        assert_eq!(r.on_push(push(0, b"b")), PushOutcome::Accepted);
        assert_eq!(r.on_push(push(u32::MAX, b"a")), PushOutcome::Accepted);
        assert_eq!(r.ack_number(), 1);
        assert_eq!(r.queued(), 2);
    }
}
