//! ARQ send-side buffers.
//!
//! [`ArqSender`] owns the two outbound queues of one connection:
//!
//! ```text
//!            snd_una                snd_nxt
//!               │                      │
//!  ─────────────┼──────────────────────┼───────────────▶ sn space
//!   acknowledged │ <──── in flight ───▶ │ <── queue ──▶
//! ```
//!
//! - `queue` holds fragments that were never transmitted; they get a
//!   sequence number only when [`ArqSender::admit`] moves them in flight.
//! - `in_flight` holds transmitted, unacknowledged segments ordered by `sn`,
//!   each with its own retransmission bookkeeping.
//!
//! Acknowledgement is selective (`Ack` names one `sn`) plus cumulative (the
//! `una` carried by every segment). This module only manages state; deciding
//! *when* to resend lives in [`crate::arq`].

use std::collections::VecDeque;

use crate::fragment::Fragment;
use crate::segment::{Command, ConnectionId, Segment};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Signed distance between two sequence numbers in wrap-around space.
#[inline]
pub(crate) fn seq_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// A segment that has been sent but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct InFlight {
    /// The segment as last put on the wire (`ts`, `wnd`, `una` are refreshed
    /// on each transmission).
    pub segment: Segment,
    /// Clock value at which the segment is due for a timeout resend.
    pub resend_at: u32,
    /// This segment's current retransmission timeout.
    pub rto: u32,
    /// How many later acks skipped over this segment.
    pub fast_ack: u32,
    /// Total transmissions (0 = admitted but not sent yet).
    pub xmit: u32,
}

impl InFlight {
    pub fn sn(&self) -> u32 {
        self.segment.sn
    }

    /// Retransmissions so far (transmissions after the first).
    pub fn retransmits(&self) -> u32 {
        self.xmit.saturating_sub(1)
    }
}

// ---------------------------------------------------------------------------
// ArqSender
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ArqSender {
    conv: ConnectionId,
    /// Oldest unacknowledged sequence number.
    snd_una: u32,
    /// Sequence number for the next admitted segment.
    snd_nxt: u32,
    queue: VecDeque<Fragment>,
    in_flight: VecDeque<InFlight>,
}

impl ArqSender {
    pub fn new(conv: ConnectionId) -> Self {
        Self {
            conv,
            snd_una: 0,
            snd_nxt: 0,
            queue: VecDeque::new(),
            in_flight: VecDeque::new(),
        }
    }

    pub fn set_conv(&mut self, conv: ConnectionId) {
        self.conv = conv;
    }

    pub fn snd_una(&self) -> u32 {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> u32 {
        self.snd_nxt
    }

    /// Queue fragments for their first transmission.
    pub fn enqueue(&mut self, fragments: impl IntoIterator<Item = Fragment>) {
        self.queue.extend(fragments);
    }

    /// Fragments waiting for a sequence number.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Segments in flight.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Span of sequence numbers between `snd_una` and `snd_nxt`.
    pub fn outstanding(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    /// `true` when nothing is queued or awaiting acknowledgement.
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    /// Move up to `count` queued fragments in flight, assigning sequence
    /// numbers. They are marked as never transmitted (`xmit == 0`); the
    /// caller's flush sends them.
    pub fn admit(&mut self, count: u32, now: u32, rto: u32) -> usize {
        let mut admitted = 0;
        while admitted < count as usize {
            let Some(fragment) = self.queue.pop_front() else {
                break;
            };
            let segment = Segment {
                conv: self.conv,
                cmd: Command::Push,
                frg: fragment.frg,
                wnd: 0,
                ts: now,
                sn: self.snd_nxt,
                una: 0,
                payload: fragment.data,
            };
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            self.in_flight.push_back(InFlight {
                segment,
                resend_at: now,
                rto,
                fast_ack: 0,
                xmit: 0,
            });
            admitted += 1;
        }
        admitted
    }

    /// Drop every in-flight segment below the cumulative `una`.
    ///
    /// Returns how many were removed and whether all of them had been sent
    /// exactly once.
    pub fn on_una(&mut self, una: u32) -> (usize, bool) {
        let mut removed = 0;
        let mut clean = true;
        while let Some(front) = self.in_flight.front() {
            if seq_diff(una, front.sn()) > 0 {
                clean &= front.xmit <= 1;
                self.in_flight.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        self.shrink();
        (removed, clean)
    }

    /// Remove the in-flight segment named by a selective ack.
    ///
    /// Returns `None` for duplicates and acks outside `[snd_una, snd_nxt)`.
    pub fn on_ack(&mut self, sn: u32) -> Option<InFlight> {
        if seq_diff(sn, self.snd_una) < 0 || seq_diff(sn, self.snd_nxt) >= 0 {
            return None;
        }
        let pos = self
            .in_flight
            .iter()
            .position(|e| e.sn() == sn)?;
        let entry = self.in_flight.remove(pos);
        self.shrink();
        entry
    }

    /// Count one skip for every in-flight segment older than `sn`.
    pub fn on_fast_ack(&mut self, sn: u32) {
        if seq_diff(sn, self.snd_una) < 0 || seq_diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        for entry in self.in_flight.iter_mut() {
            if seq_diff(sn, entry.sn()) <= 0 {
                break;
            }
            entry.fast_ack += 1;
        }
    }

    /// Iterate over in-flight segments from oldest to newest.
    pub fn in_flight_mut(&mut self) -> impl Iterator<Item = &mut InFlight> {
        self.in_flight.iter_mut()
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &InFlight> {
        self.in_flight.iter()
    }

    /// Recompute `snd_una` from the oldest in-flight segment.
    fn shrink(&mut self) {
        self.snd_una = self
            .in_flight
            .front()
            .map_or(self.snd_nxt, |e| e.sn());
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
