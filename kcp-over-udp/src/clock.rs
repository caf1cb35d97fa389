//! Millisecond clock used to drive `tick`.
//!
//! The engine never reads the system time itself: every time-based decision
//! uses the `now` value the caller passes in. Timestamps are `u32`
//! milliseconds and wrap after ~49 days, so they are always compared through
//! [`diff`].

use std::time::Instant;

/// Signed distance `later - earlier` in wrap-around millisecond space.
#[inline]
pub fn diff(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// Monotonic millisecond counter starting at zero.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since the clock was created, truncated to 32 bits.
    pub fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_handles_wrap_around() {
        assert_eq!(diff(5, u32::MAX - 4), 10);
        assert_eq!(diff(u32::MAX - 4, 5), -10);
        assert_eq!(diff(100, 100), 0);
    }

    #[test]
    fn clock_starts_near_zero() {
        assert!(Clock::new().now_ms() < 1_000);
    }
}
