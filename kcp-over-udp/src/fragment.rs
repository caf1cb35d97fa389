//! Message fragmentation and reassembly.
//!
//! A message larger than one segment payload (`mss`) is split into `N`
//! fragments. The first carries `frg = N-1`, each later one a count one
//! lower, the last `frg = 0`:
//!
//! ```text
//!  message:  [ aaaa bbbb cc ]          mss = 4
//!  segments: frg=2 "aaaa" │ frg=1 "bbbb" │ frg=0 "cc"
//! ```
//!
//! On the receive side the ARQ layer already guarantees that the receive
//! queue holds segments in contiguous sequence order, so reassembly only has
//! to check that the run at the front of the queue counts down without a
//! break. Partial messages are never delivered: a broken run is discarded,
//! and so is a run that cannot complete because the queue is full. Once a
//! message has been cut short, its remaining fragments are dropped as they
//! reach the front, up to and including the one with `frg = 0`.

use std::collections::VecDeque;

use crate::config::FRG_MAX;
use crate::error::Error;
use crate::event::Channel;
use crate::segment::Segment;

/// One piece of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Fragments remaining after this one.
    pub frg: u8,
    pub data: Vec<u8>,
}

/// Split `message` into fragments of at most `mss` bytes.
///
/// An empty message yields a single empty fragment. Fails with
/// [`Error::MessageTooLarge`] when more than `max_fragments` would be needed.
pub fn split(message: &[u8], mss: usize, max_fragments: usize) -> Result<Vec<Fragment>, Error> {
    let mss = mss.max(1);
    let max_fragments = max_fragments.min(FRG_MAX + 1);
    let count = if message.is_empty() {
        1
    } else {
        message.len().div_ceil(mss)
    };
    if count > max_fragments {
        return Err(Error::MessageTooLarge {
            channel: Channel::Reliable,
            len: message.len(),
            max: mss * max_fragments,
        });
    }

    if message.is_empty() {
        return Ok(vec![Fragment {
            frg: 0,
            data: Vec::new(),
        }]);
    }

    Ok(message
        .chunks(mss)
        .enumerate()
        .map(|(i, chunk)| Fragment {
            frg: (count - 1 - i) as u8,
            data: chunk.to_vec(),
        })
        .collect())
}

/// Result of one reassembly attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// A whole message was removed from the queue.
    Complete(Vec<u8>),
    /// The front run is still missing fragments (or the queue is empty).
    Pending,
    /// A partial message of this many fragments was dropped.
    Discarded(usize),
}

/// Rebuilds messages from the in-order receive queue.
#[derive(Debug, Clone)]
pub struct Reassembler {
    stall_limit: u32,
    stalls: u32,
    /// A message was dropped before its last fragment arrived.
    discarding: bool,
}

impl Reassembler {
    /// `stall_limit` is how many attempts an incomplete message may sit in a
    /// full queue before it is discarded.
    pub fn new(stall_limit: u32) -> Self {
        Self {
            stall_limit,
            stalls: 0,
            discarding: false,
        }
    }

    /// Size of the next complete message, without removing it.
    pub fn peek_size(&self, queue: &VecDeque<Segment>) -> Option<usize> {
        if self.discarding {
            return None;
        }
        match Self::scan(queue) {
            Run::Complete(n) => Some(queue.iter().take(n).map(|s| s.payload.len()).sum()),
            Run::Incomplete | Run::Broken(_) => None,
        }
    }

    /// Try to take one message from the front of `queue`.
    ///
    /// `queue_full` tells whether the queue has reached the receive window,
    /// in which case an incomplete run can never grow.
    pub fn next_message(&mut self, queue: &mut VecDeque<Segment>, queue_full: bool) -> Reassembly {
        if self.discarding {
            return match self.drop_tail(queue) {
                0 => Reassembly::Pending,
                n => Reassembly::Discarded(n),
            };
        }
        match Self::scan(queue) {
            Run::Complete(n) => {
                self.stalls = 0;
                let mut message = Vec::with_capacity(
                    queue.iter().take(n).map(|s| s.payload.len()).sum(),
                );
                for seg in queue.drain(..n) {
                    message.extend_from_slice(&seg.payload);
                }
                Reassembly::Complete(message)
            }
            Run::Broken(n) => {
                self.stalls = 0;
                self.discarding = true;
                queue.drain(..n);
                Reassembly::Discarded(n)
            }
            Run::Incomplete if queue_full && !queue.is_empty() => {
                self.stalls += 1;
                if self.stalls > self.stall_limit {
                    self.stalls = 0;
                    self.discarding = true;
                    let n = queue.len();
                    queue.clear();
                    Reassembly::Discarded(n)
                } else {
                    Reassembly::Pending
                }
            }
            Run::Incomplete => {
                self.stalls = 0;
                Reassembly::Pending
            }
        }
    }

    /// Drop leftover fragments of a cut-short message, through `frg = 0`.
    fn drop_tail(&mut self, queue: &mut VecDeque<Segment>) -> usize {
        let mut dropped = 0;
        while let Some(seg) = queue.pop_front() {
            dropped += 1;
            if seg.frg == 0 {
                self.discarding = false;
                break;
            }
        }
        dropped
    }

    fn scan(queue: &VecDeque<Segment>) -> Run {
        let Some(first) = queue.front() else {
            return Run::Incomplete;
        };
        let mut expected = first.frg;
        for (i, seg) in queue.iter().enumerate() {
            if seg.frg != expected {
                return Run::Broken(i);
            }
            if seg.frg == 0 {
                return Run::Complete(i + 1);
            }
            expected -= 1;
        }
        Run::Incomplete
    }
}

enum Run {
    /// The first `n` segments form a whole message.
    Complete(usize),
    /// The first `n` segments do not count down into the next one.
    Broken(usize),
    Incomplete,
}
