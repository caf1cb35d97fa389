//! Round-trip time estimation and retransmission timeouts.
//!
//! RTO is computed using Jacobson's algorithm (RFC 6298):
//!   `RTO = SRTT + 4 × RTTVAR`
//! clamped to `[min_rto, RTO_MAX]`. All values are integer milliseconds.
//!
//! Each in-flight segment carries its own RTO, seeded from the estimator on
//! first transmission and grown by [`RttEstimator::backoff`] on every timeout.

use crate::config::{RTO_BACKOFF_FACTOR, RTO_DEFAULT, RTO_MAX};

#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT; `None` until the first sample.
    srtt: Option<u32>,
    rttvar: u32,
    rto: u32,
    min_rto: u32,
    /// Keep per-segment RTO fixed on timeout instead of backing off.
    no_delay: bool,
}

impl RttEstimator {
    pub fn new(min_rto: u32, no_delay: bool) -> Self {
        Self {
            srtt: None,
            rttvar: 0,
            rto: RTO_DEFAULT.clamp(min_rto, RTO_MAX),
            min_rto,
            no_delay,
        }
    }

    /// Record a new RTT sample and update SRTT / RTTVAR / RTO (RFC 6298 §2).
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    ///
    /// The sample comes from a timestamp the peer echoes, so it is capped at
    /// [`RTO_MAX`] first.
    pub fn record_sample(&mut self, rtt: u32) {
        let rtt = rtt.min(RTO_MAX);
        let srtt = match self.srtt {
            None => {
                self.rttvar = rtt / 2;
                rtt
            }
            Some(srtt) => {
                let delta = rtt.abs_diff(srtt);
                self.rttvar = (3 * self.rttvar + delta) / 4;
                ((7 * srtt + rtt) / 8).max(1)
            }
        };
        self.srtt = Some(srtt);
        self.rto = srtt
            .saturating_add(self.rttvar.saturating_mul(4))
            .clamp(self.min_rto, RTO_MAX);
    }

    /// Current base retransmission timeout.
    pub fn rto(&self) -> u32 {
        self.rto
    }

    pub fn srtt(&self) -> Option<u32> {
        self.srtt
    }

    pub fn rttvar(&self) -> u32 {
        self.rttvar
    }

    /// Extra delay added to a segment's first resend deadline.
    ///
    /// Normal mode waits an extra eighth of the RTO to avoid spurious
    /// retransmits; no-delay mode does not.
    pub fn first_send_padding(&self) -> u32 {
        if self.no_delay {
            0
        } else {
            self.rto >> 3
        }
    }

    /// RTO to use for a segment after it timed out with `segment_rto`.
    ///
    /// Normal mode grows by [`RTO_BACKOFF_FACTOR`] (at least by the current
    /// base RTO); no-delay mode restarts from the base RTO.
    pub fn backoff(&self, segment_rto: u32) -> u32 {
        let next = if self.no_delay {
            self.rto
        } else {
            segment_rto
                .saturating_mul(RTO_BACKOFF_FACTOR)
                .max(segment_rto.saturating_add(self.rto))
        };
        next.min(RTO_MAX)
    }
}
