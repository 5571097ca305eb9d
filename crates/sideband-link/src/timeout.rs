//! Deadlines over the free-running hardware counter.
//!
//! The counter is a fixed-width wrapping value, so "has the deadline passed"
//! cannot be a plain comparison: both the deadline computation and the timer
//! region itself may wrap. `Timeout::expired` enumerates the wrap cases
//! explicitly so callers never misread a wrapped counter as "not yet".

use sideband_hw::TickSource;

/// Standard transaction timeout for sends and blocking receives.
pub const XFER_TIMEOUT_US: u64 = 5_000_000;

/// Wait for the controller to finish filling the words of a packet it has
/// already started. Shorter than the transaction timeout.
pub const WORD_FILL_TIMEOUT_US: u64 = 1_000_000;

/// Two-sided link reset / initialization handshake.
pub const RESET_TIMEOUT_US: u64 = 15_000_000;

/// Single doorbell handshake event.
pub const DOORBELL_EVENT_TIMEOUT_US: u64 = 5_000_000;

/// A captured (start, deadline) counter pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    start: u32,
    deadline: u32,
}

impl Timeout {
    /// Captures the current counter and a deadline `micros` away.
    ///
    /// A zero duration produces `start == deadline`, which reads as already
    /// expired; non-blocking polls rely on that.
    pub fn start<T: TickSource>(ticks: &T, micros: u64) -> Self {
        let start = ticks.now();
        let delta = micros.saturating_mul(ticks.frequency_hz()) / 1_000_000;
        // The counter is 32 bits; clamp absurd durations to the longest
        // representable wait rather than aliasing them.
        let delta = u32::try_from(delta).unwrap_or(u32::MAX);
        Self {
            start,
            deadline: start.wrapping_add(delta),
        }
    }

    /// Whether the deadline has passed, reading the counter again.
    ///
    /// Cases:
    /// - `start == deadline`: immediately expired.
    /// - `start < deadline` (no wrap in the timer region): expired once `now`
    ///   reaches the deadline, or once `now` wraps behind `start`.
    /// - `start > deadline` (the region wraps): the live window is
    ///   `[start, MAX] ∪ [0, deadline)`, so expired iff `now` sits in
    ///   `[deadline, start)`.
    pub fn expired<T: TickSource>(&self, ticks: &T) -> bool {
        if self.start == self.deadline {
            return true;
        }
        let now = ticks.now();
        if self.start < self.deadline {
            now >= self.deadline || now < self.start
        } else {
            now >= self.deadline && now < self.start
        }
    }
}
