//! Tunable protocol parameters.
//!
//! [`Config`] is shared by the server and the client; both ends should use
//! compatible values (in particular `mtu` and `receive_window_size`, which
//! bound the largest reliable message).
//!
//! The protocol constants below are the classic KCP tuning values.

use crate::error::Error;
use crate::segment::HEADER_LEN;

/// Default maximum transmission unit for one datagram, header included.
pub const MTU_DEFAULT: usize = 1200;
/// Default send window, in segments.
pub const SEND_WINDOW_DEFAULT: u16 = 32;
/// Default receive window, in segments.
pub const RECEIVE_WINDOW_DEFAULT: u16 = 128;
/// Default number of retransmissions before a link is declared dead.
pub const DEAD_LINK_DEFAULT: u32 = 20;

/// RTO before the first RTT sample (ms).
pub const RTO_DEFAULT: u32 = 200;
/// Minimum RTO in normal mode (ms).
pub const RTO_MIN: u32 = 100;
/// Minimum RTO in no-delay mode (ms).
pub const RTO_NO_DELAY: u32 = 30;
/// Upper bound for any RTO (ms).
pub const RTO_MAX: u32 = 60_000;
/// Per-timeout RTO growth factor when `no_delay` is off.
pub const RTO_BACKOFF_FACTOR: u32 = 2;

/// Initial window-probe wait once the peer advertises a zero window (ms).
pub const PROBE_INIT: u32 = 7_000;
/// Upper bound for the window-probe wait (ms).
pub const PROBE_LIMIT: u32 = 120_000;

/// Lowest slow-start threshold, in segments.
pub const THRESH_MIN: u32 = 2;
/// Initial slow-start threshold, in segments.
pub const THRESH_INIT: u32 = 2;

/// Highest value the one-byte fragment count can carry.
pub const FRG_MAX: usize = u8::MAX as usize;

/// Interval between keepalive pings on an established connection (ms).
pub const PING_INTERVAL: u32 = 1_000;
/// Interval between handshake attempts while connecting (ms).
pub const HANDSHAKE_INTERVAL: u32 = 100;
/// How many copies of the final `Disconnect` segment are sent.
pub const DISCONNECT_REDUNDANCY: usize = 5;

/// Configuration for one endpoint (server or client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Let the socket accept IPv4 and IPv6 traffic. Only the socket layer
    /// looks at this.
    pub dual_mode: bool,
    /// Datagram size limit including the segment header.
    pub mtu: usize,
    /// Lower minimum RTO and disable RTO backoff growth.
    pub no_delay: bool,
    /// Minimum spacing between internal flushes (ms).
    pub interval: u32,
    /// Resend a segment after it has been skipped by this many later acks
    /// (0 disables fast resend).
    pub fast_resend: u32,
    /// Fast resend is only allowed while a segment has been sent at most
    /// this many times (0 = no limit).
    pub fast_limit: u32,
    /// Toggle classic congestion control.
    pub congestion_window: bool,
    pub send_window_size: u16,
    pub receive_window_size: u16,
    /// Idle expiry (ms). Also bounds how long a handshake may take.
    pub timeout: u32,
    /// Retransmissions allowed for one segment before the link is dead.
    pub max_retransmits: u32,
    /// Send keepalive pings through the reliable channel.
    pub reliable_ping: bool,
    /// Receive attempts a partial message may stall before it is dropped.
    pub fragment_stall_limit: u32,
    /// Ticks a local disconnect waits for in-flight data to drain.
    pub disconnect_flush_ticks: u32,
    /// Queued segments (all four buffers) above which the connection is
    /// closed as congested.
    pub queue_disconnect_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dual_mode: true,
            mtu: MTU_DEFAULT,
            no_delay: true,
            interval: 10,
            fast_resend: 0,
            fast_limit: 5,
            congestion_window: false,
            send_window_size: SEND_WINDOW_DEFAULT,
            receive_window_size: RECEIVE_WINDOW_DEFAULT,
            timeout: 10_000,
            max_retransmits: DEAD_LINK_DEFAULT,
            reliable_ping: false,
            fragment_stall_limit: 3,
            disconnect_flush_ticks: 10,
            queue_disconnect_threshold: 10_000,
        }
    }
}

impl Config {
    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: u32) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_windows(mut self, send: u16, receive: u16) -> Self {
        self.send_window_size = send;
        self.receive_window_size = receive;
        self
    }

    pub fn with_congestion_window(mut self, enabled: bool) -> Self {
        self.congestion_window = enabled;
        self
    }

    pub fn with_max_retransmits(mut self, max: u32) -> Self {
        self.max_retransmits = max;
        self
    }

    pub fn with_fast_resend(mut self, skips: u32) -> Self {
        self.fast_resend = skips;
        self
    }

    pub fn with_reliable_ping(mut self, reliable: bool) -> Self {
        self.reliable_ping = reliable;
        self
    }

    pub fn with_dual_mode(mut self, dual_mode: bool) -> Self {
        self.dual_mode = dual_mode;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Maximum payload bytes in one segment.
    pub fn mss(&self) -> usize {
        self.mtu.saturating_sub(HEADER_LEN)
    }

    /// Effective flush interval, clamped like KCP does.
    pub fn flush_interval(&self) -> u32 {
        self.interval.clamp(1, 5_000)
    }

    /// Lower bound applied to the computed RTO.
    pub fn min_rto(&self) -> u32 {
        if self.no_delay {
            RTO_NO_DELAY
        } else {
            RTO_MIN
        }
    }

    /// Most fragments a reliable message may be split into.
    ///
    /// The receiver can only reassemble a message whose fragments all fit in
    /// its receive queue, and the count must fit in one byte.
    pub fn max_fragments(&self) -> usize {
        (self.receive_window_size as usize)
            .saturating_sub(1)
            .min(FRG_MAX + 1)
    }

    /// Largest message accepted on the reliable channel.
    pub fn reliable_max_message_size(&self) -> usize {
        self.mss() * self.max_fragments()
    }

    /// Largest message accepted on the unreliable channel.
    pub fn unreliable_max_message_size(&self) -> usize {
        self.mss()
    }

    /// Reject parameter combinations the engine cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        let reason = if self.mtu <= HEADER_LEN {
            format!("mtu {} must exceed the {HEADER_LEN}-byte header", self.mtu)
        } else if self.mtu > u16::MAX as usize {
            format!("mtu {} does not fit in one datagram", self.mtu)
        } else if self.send_window_size == 0 || self.receive_window_size < 2 {
            format!(
                "windows too small (send {}, receive {})",
                self.send_window_size, self.receive_window_size
            )
        } else if self.timeout == 0 {
            "timeout must be non-zero".to_string()
        } else if self.interval == 0 {
            "interval must be non-zero".to_string()
        } else {
            return Ok(());
        };
        Err(Error::InvalidConfig(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn mss_excludes_header() {
        assert_eq!(Config::default().mss(), MTU_DEFAULT - HEADER_LEN);
    }

    #[test]
    fn reliable_limit_follows_receive_window() {
        let cfg = Config::default().with_windows(32, 16);
        assert_eq!(cfg.max_fragments(), 15);
        assert_eq!(cfg.reliable_max_message_size(), cfg.mss() * 15);
    }

    #[test]
    fn reliable_limit_caps_at_fragment_field_width() {
        let cfg = Config::default().with_windows(4096, 4096);
        assert_eq!(cfg.max_fragments(), FRG_MAX + 1);
    }

    #[test]
    fn no_delay_lowers_min_rto() {
        assert_eq!(Config::default().with_no_delay(true).min_rto(), RTO_NO_DELAY);
        assert_eq!(Config::default().with_no_delay(false).min_rto(), RTO_MIN);
    }

    #[test]
    fn tiny_mtu_is_rejected() {
        let err = Config::default().with_mtu(HEADER_LEN).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(Config::default().with_windows(0, 128).validate().is_err());
        assert!(Config::default().with_windows(32, 1).validate().is_err());
    }
}
