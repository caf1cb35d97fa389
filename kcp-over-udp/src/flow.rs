//! Flow and congestion control.
//!
//! [`FlowController`] decides how many segments may be outstanding at once:
//!
//! ```text
//! usable_window = min(send_window, remote_window, cwnd if enabled)
//! ```
//!
//! The congestion window follows the classic slow-start / congestion
//! avoidance scheme (counted in segments, with a byte-granular increment for
//! the additive phase). It is always maintained, but only limits sending when
//! congestion control is enabled. Low-latency deployments usually leave it
//! off and rely on large fixed windows instead.

use crate::config::{RECEIVE_WINDOW_DEFAULT, THRESH_INIT, THRESH_MIN};

#[derive(Debug, Clone)]
pub struct FlowController {
    /// Configured cap on outstanding segments.
    send_window: u32,
    /// Last receive window advertised by the peer.
    remote_window: u32,
    cwnd: u32,
    ssthresh: u32,
    /// Byte counter driving additive increase.
    incr: u32,
    mss: u32,
    congestion_enabled: bool,
}

impl FlowController {
    pub fn new(send_window: u16, mss: usize, congestion_enabled: bool) -> Self {
        let mss = mss as u32;
        Self {
            send_window: send_window as u32,
            remote_window: RECEIVE_WINDOW_DEFAULT as u32,
            cwnd: 1,
            ssthresh: THRESH_INIT,
            incr: mss,
            mss,
            congestion_enabled,
        }
    }

    /// Segments that may be outstanding (in flight) right now.
    pub fn usable_window(&self) -> u32 {
        let window = self.send_window.min(self.remote_window);
        if self.congestion_enabled {
            window.min(self.cwnd)
        } else {
            window
        }
    }

    /// New segments that may be put in flight given `in_flight` outstanding.
    pub fn available(&self, in_flight: u32) -> u32 {
        self.usable_window().saturating_sub(in_flight)
    }

    pub fn set_remote_window(&mut self, window: u16) {
        self.remote_window = window as u32;
    }

    pub fn remote_window(&self) -> u32 {
        self.remote_window
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// The peer acknowledged new data that was never retransmitted.
    pub fn on_ack_progress(&mut self) {
        if self.cwnd >= self.remote_window {
            return;
        }
        let mss = self.mss.max(1);
        if self.cwnd < self.ssthresh {
            // Slow start: one segment per ack doubles cwnd every RTT.
            self.cwnd += 1;
            self.incr = self.incr.saturating_add(mss);
        } else {
            self.incr = self.incr.max(mss);
            self.incr = self
                .incr
                .saturating_add(mss * mss / self.incr + mss / 16);
            if (self.cwnd + 1) * mss <= self.incr {
                self.cwnd = (self.incr + mss - 1) / mss;
            }
        }
        if self.cwnd > self.remote_window {
            self.cwnd = self.remote_window;
            self.incr = self.remote_window.saturating_mul(mss);
        }
    }

    /// A segment was resent because later acks skipped it.
    pub fn on_fast_retransmit(&mut self, in_flight: u32, fast_resend: u32) {
        self.ssthresh = (in_flight / 2).max(THRESH_MIN);
        self.cwnd = self.ssthresh + fast_resend;
        self.incr = self.cwnd.saturating_mul(self.mss);
        self.floor();
    }

    /// A segment timed out.
    pub fn on_timeout_loss(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(THRESH_MIN);
        self.cwnd = 1;
        self.incr = self.mss;
    }

    fn floor(&mut self) {
        if self.cwnd < 1 {
            self.cwnd = 1;
            self.incr = self.mss;
        }
    }
}
