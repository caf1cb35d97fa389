//! The per-connection ARQ engine.
//!
//! # Architecture
//!
//! ```text
//!  send(message)                                   recv() -> message
//!      │                                                 ▲
//!      ▼                                                 │
//!  fragment::split ──▶ ArqSender.queue          Reassembler
//!                          │ admit (usable window)       ▲
//!                          ▼                             │
//!                      ArqSender.in_flight      ArqReceiver.queue
//!                          │ flush / resend              ▲
//!                          ▼                             │
//!                       outbox ──▶ socket ──▶ input ──▶ ArqReceiver.buffer
//! ```
//!
//! [`Arq`] never touches a socket. [`Arq::input`] consumes decoded segments,
//! [`Arq::update`] runs the timers and fills an outbox of segments that the
//! owning connection encodes and sends. Time is whatever `now` the caller
//! passes in.
//!
//! One flush does, in order: pending acks, window probes, admitting queued
//! fragments into the usable window, then (re)transmitting every in-flight
//! segment that is new, timed out, or skipped by `fast_resend` later acks.

use crate::clock;
use crate::config::{Config, PROBE_INIT, PROBE_LIMIT};
use crate::error::Error;
use crate::flow::FlowController;
use crate::fragment::{self, Fragment, Reassembler, Reassembly};
use crate::receiver::{ArqReceiver, PushOutcome};
use crate::rtt::RttEstimator;
use crate::segment::{Command, ConnectionId, Segment};
use crate::sender::ArqSender;

/// Flush a `WindowProbe` on the next flush.
const ASK_SEND: u8 = 1;
/// Flush a `WindowProbeAck` on the next flush.
const ASK_TELL: u8 = 2;

/// Engine bookkeeping exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArqStats {
    /// Segments sent more than once (timeout and fast resends).
    pub retransmissions: u64,
    pub fast_retransmissions: u64,
    /// Partial messages, and late tails of them, dropped by the reassembler.
    pub discarded_messages: u64,
    pub duplicate_segments: u64,
}

/// Why the link was declared dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadLink {
    pub sn: u32,
    pub retransmits: u32,
}

#[derive(Debug)]
pub struct Arq {
    conv: ConnectionId,
    mss: usize,
    max_fragments: usize,
    sender: ArqSender,
    receiver: ArqReceiver,
    reassembler: Reassembler,
    rtt: RttEstimator,
    flow: FlowController,

    /// Clock value of the last `update` or `input`.
    current: u32,
    interval: u32,
    next_flush: u32,
    updated: bool,

    probe: u8,
    probe_wait: u32,
    probe_at: u32,

    fast_resend: u32,
    fast_limit: u32,
    max_retransmits: u32,
    dead: Option<DeadLink>,

    outbox: Vec<Segment>,
    stats: ArqStats,
}

impl Arq {
    pub fn new(conv: ConnectionId, config: &Config) -> Self {
        let mss = config.mss();
        Self {
            conv,
            mss,
            max_fragments: config.max_fragments(),
            sender: ArqSender::new(conv),
            receiver: ArqReceiver::new(config.receive_window_size),
            reassembler: Reassembler::new(config.fragment_stall_limit),
            rtt: RttEstimator::new(config.min_rto(), config.no_delay),
            flow: FlowController::new(config.send_window_size, mss, config.congestion_window),
            current: 0,
            interval: config.flush_interval(),
            next_flush: 0,
            updated: false,
            probe: 0,
            probe_wait: 0,
            probe_at: 0,
            fast_resend: config.fast_resend,
            fast_limit: config.fast_limit,
            max_retransmits: config.max_retransmits,
            dead: None,
            outbox: Vec::new(),
            stats: ArqStats::default(),
        }
    }

    pub fn conv(&self) -> ConnectionId {
        self.conv
    }

    /// Adopt the id assigned during the handshake.
    pub fn set_conv(&mut self, conv: ConnectionId) {
        self.conv = conv;
        self.sender.set_conv(conv);
    }

    // -----------------------------------------------------------------------
    // Application side
    // -----------------------------------------------------------------------

    /// Queue a reliable message, splitting it into fragments.
    pub fn send(&mut self, message: &[u8]) -> Result<(), Error> {
        let fragments = fragment::split(message, self.mss, self.max_fragments)?;
        self.sender.enqueue(fragments);
        Ok(())
    }

    /// Queue an empty reliable message (keepalive).
    pub fn send_ping(&mut self) {
        self.sender.enqueue([Fragment {
            frg: 0,
            data: Vec::new(),
        }]);
    }

    /// Take the next complete reliable message, if any.
    ///
    /// Empty messages are keepalives; they are consumed here and skipped.
    pub fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            let was_full = self.receiver.queue_full();
            let outcome = self
                .reassembler
                .next_message(self.receiver.queue_mut(), was_full);
            self.receiver.advance();
            // The peer may be stalled on our zero window; tell it right away.
            if was_full && !self.receiver.queue_full() {
                self.probe |= ASK_TELL;
            }
            match outcome {
                Reassembly::Complete(message) if message.is_empty() => continue,
                Reassembly::Complete(message) => return Some(message),
                Reassembly::Discarded(fragments) => {
                    self.stats.discarded_messages += 1;
                    log::warn!(
                        "[arq] conv={} dropped partial message of {} fragment(s)",
                        self.conv,
                        fragments
                    );
                    continue;
                }
                Reassembly::Pending => return None,
            }
        }
    }

    /// Size of the next complete message, without taking it.
    pub fn peek_size(&self) -> Option<usize> {
        self.reassembler.peek_size(self.receiver.queue())
    }

    // -----------------------------------------------------------------------
    // Network side
    // -----------------------------------------------------------------------

    /// Process one decoded inbound segment addressed to this connection.
    pub fn input(&mut self, segment: Segment, now: u32) {
        self.current = now;
        let prev_una = self.sender.snd_una();

        self.flow.set_remote_window(segment.wnd);
        let mut clean = true;

        // The selective ack goes first: the segment's own `una` usually
        // covers the acked sn too, and the RTT sample needs the entry.
        if segment.cmd == Command::Ack {
            if let Some(entry) = self.sender.on_ack(segment.sn) {
                clean &= entry.xmit <= 1;
                let rtt = clock::diff(now, segment.ts);
                if rtt >= 0 {
                    self.rtt.record_sample(rtt as u32);
                }
                self.sender.on_fast_ack(segment.sn);
            } else {
                self.stats.duplicate_segments += 1;
            }
        }
        let (_, una_clean) = self.sender.on_una(segment.una);
        clean &= una_clean;

        match segment.cmd {
            Command::Ack => {}
            Command::Push => match self.receiver.on_push(segment) {
                PushOutcome::Accepted => {}
                PushOutcome::Duplicate => self.stats.duplicate_segments += 1,
                PushOutcome::OutOfWindow => {
                    log::debug!("[arq] conv={} push outside receive window", self.conv);
                }
            },
            Command::WindowProbe => self.probe |= ASK_TELL,
            // Window and una were already taken from the header.
            Command::WindowProbeAck
            | Command::Handshake
            | Command::Disconnect
            | Command::Unreliable => {}
        }

        if clock::diff(self.sender.snd_una(), prev_una) > 0 && clean {
            self.flow.on_ack_progress();
        }
    }

    /// Advance the clock; flushes when the flush interval has elapsed.
    pub fn update(&mut self, now: u32) {
        self.current = now;
        if !self.updated {
            self.updated = true;
            self.next_flush = now;
        }

        let mut slap = clock::diff(now, self.next_flush);
        if !(-10_000..10_000).contains(&slap) {
            self.next_flush = now;
            slap = 0;
        }

        if slap >= 0 {
            self.next_flush = self.next_flush.wrapping_add(self.interval);
            if clock::diff(now, self.next_flush) >= 0 {
                self.next_flush = now.wrapping_add(self.interval);
            }
            self.flush();
        }
    }

    /// Flush immediately, ignoring the flush interval.
    pub fn flush_at(&mut self, now: u32) {
        self.current = now;
        self.flush();
    }

    /// Build every segment that is due at the current clock into the outbox.
    pub fn flush(&mut self) {
        if self.dead.is_some() {
            return;
        }
        let now = self.current;
        let wnd = self.receiver.window_unused();
        let una = self.receiver.ack_number();

        for (sn, ts) in self.receiver.take_acks() {
            self.outbox.push(Segment {
                conv: self.conv,
                cmd: Command::Ack,
                frg: 0,
                wnd,
                ts,
                sn,
                una,
                payload: Vec::new(),
            });
        }

        self.update_probe(now);
        if self.probe & ASK_SEND != 0 {
            let probe = self.control(Command::WindowProbe, wnd, una);
            self.outbox.push(probe);
        }
        if self.probe & ASK_TELL != 0 {
            let tell = self.control(Command::WindowProbeAck, wnd, una);
            self.outbox.push(tell);
        }
        self.probe = 0;

        let room = self.flow.available(self.sender.outstanding());
        self.sender.admit(room, now, self.rtt.rto());

        let fast_resend = if self.fast_resend > 0 {
            self.fast_resend
        } else {
            u32::MAX
        };
        let mut fast_resent = false;
        let mut lost = false;

        for entry in self.sender.in_flight_mut() {
            let send = if entry.xmit == 0 {
                entry.rto = self.rtt.rto();
                entry.resend_at = now
                    .wrapping_add(entry.rto)
                    .wrapping_add(self.rtt.first_send_padding());
                true
            } else if clock::diff(now, entry.resend_at) >= 0 {
                if entry.retransmits() >= self.max_retransmits {
                    self.dead = Some(DeadLink {
                        sn: entry.sn(),
                        retransmits: entry.retransmits(),
                    });
                    break;
                }
                entry.rto = self.rtt.backoff(entry.rto);
                entry.resend_at = now.wrapping_add(entry.rto);
                self.stats.retransmissions += 1;
                lost = true;
                true
            } else if entry.fast_ack >= fast_resend
                && (self.fast_limit == 0 || entry.xmit <= self.fast_limit)
            {
                if entry.retransmits() >= self.max_retransmits {
                    self.dead = Some(DeadLink {
                        sn: entry.sn(),
                        retransmits: entry.retransmits(),
                    });
                    break;
                }
                entry.fast_ack = 0;
                entry.resend_at = now.wrapping_add(entry.rto);
                self.stats.retransmissions += 1;
                self.stats.fast_retransmissions += 1;
                fast_resent = true;
                true
            } else {
                false
            };

            if send {
                entry.xmit += 1;
                entry.segment.ts = now;
                entry.segment.wnd = wnd;
                entry.segment.una = una;
                self.outbox.push(entry.segment.clone());
            }
        }

        if let Some(dead) = self.dead {
            log::warn!(
                "[arq] conv={} dead link: sn={} after {} retransmits",
                self.conv,
                dead.sn,
                dead.retransmits
            );
            return;
        }

        if fast_resent {
            self.flow
                .on_fast_retransmit(self.sender.outstanding(), self.fast_resend);
        }
        if lost {
            log::debug!(
                "[arq] conv={} timeout resend, rto={} cwnd={}",
                self.conv,
                self.rtt.rto(),
                self.flow.cwnd()
            );
            self.flow.on_timeout_loss();
        }
    }

    /// Schedule window probes while the peer advertises a zero window.
    fn update_probe(&mut self, now: u32) {
        if self.flow.remote_window() != 0 {
            self.probe_wait = 0;
            self.probe_at = 0;
            return;
        }
        if self.probe_wait == 0 {
            self.probe_wait = PROBE_INIT;
            self.probe_at = now.wrapping_add(self.probe_wait);
        } else if clock::diff(now, self.probe_at) >= 0 {
            self.probe_wait = self.probe_wait.max(PROBE_INIT);
            self.probe_wait = (self.probe_wait + self.probe_wait / 2).min(PROBE_LIMIT);
            self.probe_at = now.wrapping_add(self.probe_wait);
            self.probe |= ASK_SEND;
        }
    }

    /// A header-only segment stamped with the current receive state.
    pub fn control(&self, cmd: Command, wnd: u16, una: u32) -> Segment {
        Segment {
            wnd,
            una,
            ts: self.current,
            ..Segment::control(self.conv, cmd)
        }
    }

    /// Header-only segment with the live window and ack number.
    pub fn control_now(&self, cmd: Command) -> Segment {
        self.control(cmd, self.receiver.window_unused(), self.receiver.ack_number())
    }

    /// Take the segments built by the last flush.
    pub fn drain_outbox(&mut self) -> std::vec::Drain<'_, Segment> {
        self.outbox.drain(..)
    }

    // -----------------------------------------------------------------------
    // State inspection
    // -----------------------------------------------------------------------

    pub fn dead_link(&self) -> Option<DeadLink> {
        self.dead
    }

    /// Nothing left to send, resend or acknowledge.
    pub fn is_drained(&self) -> bool {
        self.sender.is_drained() && self.receiver.pending_acks() == 0
    }

    /// Segments held across all four buffers.
    pub fn total_queued(&self) -> usize {
        self.sender.queued()
            + self.sender.in_flight_len()
            + self.receiver.buffered()
            + self.receiver.queued()
    }

    /// Fragments sent but unacknowledged plus those waiting to be sent.
    pub fn waiting_to_send(&self) -> usize {
        self.sender.queued() + self.sender.in_flight_len()
    }

    pub fn usable_window(&self) -> u32 {
        self.flow.usable_window()
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn snd_una(&self) -> u32 {
        self.sender.snd_una()
    }

    pub fn rcv_nxt(&self) -> u32 {
        self.receiver.ack_number()
    }

    pub fn stats(&self) -> ArqStats {
        self.stats
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RTO_MAX;

    fn config() -> Config {
        Config::default().with_interval(10)
    }

    /// Shuttle every outbox segment from `from` into `to`, optionally
    /// dropping some by index.
    fn deliver(from: &mut Arq, to: &mut Arq, now: u32, mut drop: impl FnMut(&Segment) -> bool) {
        let segments: Vec<Segment> = from.drain_outbox().collect();
        for seg in segments {
            if !drop(&seg) {
                to.input(seg, now);
            }
        }
    }

    /// Run both engines for `ticks` steps of 10ms with a lossless link.
    fn run(a: &mut Arq, b: &mut Arq, start: u32, ticks: u32) -> u32 {
        let mut now = start;
        for _ in 0..ticks {
            a.update(now);
            b.update(now);
            deliver(a, b, now, |_| false);
            deliver(b, a, now, |_| false);
            now += 10;
        }
        now
    }

    #[test]
    fn message_crosses_lossless_link() {
        let mut a = Arq::new(1, &config());
        let mut b = Arq::new(1, &config());
        a.send(b"hello").unwrap();
        run(&mut a, &mut b, 0, 3);
        assert_eq!(b.recv(), Some(b"hello".to_vec()));
        assert_eq!(b.recv(), None);
        assert!(a.is_drained());
    }

    #[test]
    fn large_message_is_reassembled() {
        let cfg = config();
        let message: Vec<u8> = (0..cfg.mss() * 5).map(|i| i as u8).collect();
        let mut a = Arq::new(1, &cfg);
        let mut b = Arq::new(1, &cfg);
        a.send(&message).unwrap();
        assert_eq!(b.peek_size(), None);
        run(&mut a, &mut b, 0, 5);
        assert_eq!(b.peek_size(), Some(message.len()));
        assert_eq!(b.recv(), Some(message));
    }

    #[test]
    fn undersized_receive_window_never_delivers_part_of_a_message() {
        let sender_cfg = config();
        let receiver_cfg = config().with_windows(32, 4);
        let big: Vec<u8> = (0..sender_cfg.mss() * 6).map(|i| i as u8).collect();
        let mut a = Arq::new(1, &sender_cfg);
        let mut b = Arq::new(1, &receiver_cfg);
        a.send(&big).unwrap();
        a.send(b"after").unwrap();

        let mut delivered = Vec::new();
        let mut now = 0;
        for _ in 0..3_000 {
            a.update(now);
            b.update(now);
            deliver(&mut a, &mut b, now, |_| false);
            deliver(&mut b, &mut a, now, |_| false);
            delivered.extend(std::iter::from_fn(|| b.recv()));
            now += 10;
        }

        // Six fragments can never fit a four-slot queue, so the big message
        // is dropped whole and the next one still gets through.
        assert_eq!(delivered, vec![b"after".to_vec()]);
        assert!(b.stats().discarded_messages >= 1);
        assert!(a.is_drained());
        assert_eq!(a.dead_link(), None);
    }

    #[test]
    fn ack_updates_una_and_rtt() {
        let mut a = Arq::new(1, &config());
        let mut b = Arq::new(1, &config());
        a.send(b"x").unwrap();
        a.update(0);
        deliver(&mut a, &mut b, 0, |_| false);
        b.update(0);
        deliver(&mut b, &mut a, 40, |_| false);
        assert_eq!(a.snd_una(), 1);
        assert_eq!(a.rtt().srtt(), Some(40));
    }

    #[test]
    fn forged_ack_timestamp_cannot_overflow_rtt() {
        let mut a = Arq::new(1, &config());
        a.send(b"one").unwrap();
        a.send(b"two").unwrap();
        a.update(0);
        assert_eq!(a.drain_outbox().count(), 2);

        let late = i32::MAX as u32;
        let ack = |sn: u32, ts: u32| Segment {
            sn,
            ts,
            wnd: 128,
            ..Segment::control(1, Command::Ack)
        };
        a.input(ack(0, 0), late);
        a.input(ack(1, late), late.wrapping_add(10));
        assert_eq!(a.snd_una(), 2);
        assert!(a.rtt().srtt().unwrap() <= RTO_MAX);
        assert!(a.rtt().rto() <= RTO_MAX);
    }

    #[test]
    fn timeout_resends_lost_segment() {
        let mut a = Arq::new(1, &config());
        let mut b = Arq::new(1, &config());
        a.send(b"lost once").unwrap();
        a.update(0);
        let first: Vec<Segment> = a.drain_outbox().collect();
        assert_eq!(first.len(), 1); // dropped on the floor

        // Nothing is resent before the RTO elapses.
        a.update(100);
        assert_eq!(a.drain_outbox().count(), 0);

        a.update(a.rtt().rto() + 10);
        deliver(&mut a, &mut b, 0, |_| false);
        assert_eq!(b.recv(), Some(b"lost once".to_vec()));
        assert_eq!(a.stats().retransmissions, 1);
    }

    #[test]
    fn dead_link_after_max_retransmits() {
        let cfg = config().with_max_retransmits(3).with_no_delay(true);
        let mut a = Arq::new(1, &cfg);
        a.send(b"into the void").unwrap();

        let mut transmissions = 0;
        let mut now = 0;
        while a.dead_link().is_none() && now < 100_000 {
            a.update(now);
            transmissions += a.drain_outbox().count();
            now += 10;
        }
        assert_eq!(
            a.dead_link(),
            Some(DeadLink {
                sn: 0,
                retransmits: 3
            })
        );
        assert_eq!(transmissions, 4); // first send + 3 retransmits

        // Nothing more is ever sent.
        for _ in 0..100 {
            a.update(now);
            now += 1_000;
        }
        assert_eq!(a.drain_outbox().count(), 0);
    }

    #[test]
    fn duplicate_push_is_not_redelivered() {
        let mut a = Arq::new(1, &config());
        let mut b = Arq::new(1, &config());
        a.send(b"once").unwrap();
        a.update(0);
        let seg: Vec<Segment> = a.drain_outbox().collect();
        b.input(seg[0].clone(), 0);
        assert_eq!(b.recv(), Some(b"once".to_vec()));
        let rcv_nxt = b.rcv_nxt();

        b.input(seg[0].clone(), 5);
        assert_eq!(b.recv(), None);
        assert_eq!(b.rcv_nxt(), rcv_nxt);
        assert_eq!(b.stats().duplicate_segments, 1);
    }

    #[test]
    fn duplicate_ack_leaves_una_and_rtt_alone() {
        let mut a = Arq::new(1, &config());
        let mut b = Arq::new(1, &config());
        a.send(b"x").unwrap();
        a.update(0);
        deliver(&mut a, &mut b, 0, |_| false);
        b.update(0);
        let acks: Vec<Segment> = b.drain_outbox().collect();
        a.input(acks[0].clone(), 50);
        let (una, srtt, rto) = (a.snd_una(), a.rtt().srtt(), a.rtt().rto());

        a.input(acks[0].clone(), 900);
        assert_eq!(a.snd_una(), una);
        assert_eq!(a.rtt().srtt(), srtt);
        assert_eq!(a.rtt().rto(), rto);
    }

    #[test]
    fn reordered_segments_deliver_in_order() {
        let mut a = Arq::new(1, &config());
        let mut b = Arq::new(1, &config());
        for i in 0..5u8 {
            a.send(&[i]).unwrap();
        }
        a.update(0);
        let mut segs: Vec<Segment> = a.drain_outbox().collect();
        segs.reverse();
        for seg in segs {
            b.input(seg, 0);
        }
        let got: Vec<Vec<u8>> = std::iter::from_fn(|| b.recv()).collect();
        assert_eq!(got, (0..5u8).map(|i| vec![i]).collect::<Vec<_>>());
    }

    #[test]
    fn send_window_limits_first_flush() {
        let cfg = config().with_windows(4, 128);
        let mut a = Arq::new(1, &cfg);
        for i in 0..10u8 {
            a.send(&[i]).unwrap();
        }
        a.update(0);
        assert_eq!(a.drain_outbox().count(), 4);
        assert_eq!(a.waiting_to_send(), 10);
    }

    #[test]
    fn fast_resend_after_skips() {
        let cfg = config().with_fast_resend(2).with_no_delay(false);
        let mut a = Arq::new(1, &cfg);
        let mut b = Arq::new(1, &cfg);
        for i in 0..4u8 {
            a.send(&[i]).unwrap();
        }
        a.update(0);
        // Lose sn 0 only.
        deliver(&mut a, &mut b, 0, |s| s.sn == 0);
        b.update(0);
        deliver(&mut b, &mut a, 5, |_| false);
        a.update(10);
        let resent: Vec<Segment> = a.drain_outbox().collect();
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].sn, 0);
        assert_eq!(a.stats().fast_retransmissions, 1);
    }

    #[test]
    fn zero_window_triggers_probe() {
        let mut a = Arq::new(1, &config());
        let mut zero = a.control_now(Command::WindowProbeAck);
        zero.wnd = 0;
        a.input(zero, 0);
        a.send(b"stalled").unwrap();
        a.update(0);
        assert_eq!(a.drain_outbox().count(), 0);

        a.update(PROBE_INIT + 10);
        let out: Vec<Segment> = a.drain_outbox().collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].cmd, Command::WindowProbe);
    }

    #[test]
    fn window_probe_is_answered() {
        let mut a = Arq::new(1, &config());
        let probe = a.control_now(Command::WindowProbe);
        a.input(probe, 0);
        a.update(0);
        let out: Vec<Segment> = a.drain_outbox().collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].cmd, Command::WindowProbeAck);
        assert_eq!(out[0].wnd, config().receive_window_size);
    }

    #[test]
    fn ping_is_never_surfaced() {
        let mut a = Arq::new(1, &config());
        let mut b = Arq::new(1, &config());
        a.send_ping();
        a.send(b"after ping").unwrap();
        run(&mut a, &mut b, 0, 3);
        assert_eq!(b.recv(), Some(b"after ping".to_vec()));
        assert_eq!(b.recv(), None);
    }

    #[test]
    fn congestion_window_grows_on_clean_acks() {
        let cfg = config().with_congestion_window(true);
        let mut a = Arq::new(1, &cfg);
        let mut b = Arq::new(1, &cfg);
        assert_eq!(a.usable_window(), 1);
        for i in 0..20u8 {
            a.send(&[i]).unwrap();
        }
        run(&mut a, &mut b, 0, 100);
        assert!(a.flow().cwnd() > 1);
        assert!(a.usable_window() <= a.flow().cwnd());
        let got: Vec<Vec<u8>> = std::iter::from_fn(|| b.recv()).collect();
        assert_eq!(got.len(), 20);
    }
}
