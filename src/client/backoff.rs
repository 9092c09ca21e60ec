//! Reconnect backoff arithmetic.
//!
//! Delay grows geometrically between redial attempts and is clamped to
//! `[initial, max]`. The first attempt after a drop always waits the
//! initial delay; a successful handshake resets the sequence.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default growth factor between attempts.
const DEFAULT_FACTOR: f64 = 2.0;

// ============================================================================
// Backoff
// ============================================================================

/// Exponential backoff schedule for the reconnect supervisor.
///
/// A zero `initial` delay disables reconnection entirely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay of the first attempt; also the floor of the schedule.
    pub initial: Duration,
    /// Ceiling of the schedule.
    pub max: Duration,
    /// Growth factor applied to the previous delay.
    pub factor: f64,
}

impl Backoff {
    /// Creates a schedule with the default growth factor.
    #[inline]
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            factor: DEFAULT_FACTOR,
        }
    }

    /// Sets the growth factor (values below 1 are treated as 1).
    #[inline]
    #[must_use]
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Creates a schedule that disables reconnection.
    #[inline]
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Returns `true` if reconnection is enabled.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.initial.is_zero()
    }

    /// Computes the delay following `previous`.
    ///
    /// `next(0)` is the initial delay; otherwise
    /// `clamp(previous * factor, initial, max)`. The sequence never
    /// decreases below the initial delay.
    #[must_use]
    pub fn next(&self, previous: Duration) -> Duration {
        if previous.is_zero() {
            return self.initial;
        }

        let ceiling = self.max.max(self.initial);
        let scaled = previous.mul_f64(self.factor.max(1.0));
        scaled.clamp(self.initial, ceiling)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

// ============================================================================
// Tests
// ============================================================================
