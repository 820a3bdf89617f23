//! Consecutive-failure circuit breaker.
//!
//! Converts a burst of consecutive failures into a temporary admission
//! freeze, avoiding repeated wasted attempts against a possibly-unhealthy
//! executor (e.g. an accelerator stuck in an out-of-memory state). Tracks
//! only the current streak; any single success fully resets it.

/// Circuit breaker over a consecutive-failure streak.
///
/// Pure and synchronous: every time-dependent operation takes an explicit
/// `now_ms` so the queue passes its clock through and unit tests pass their
/// own.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown_ms: u64,
    consecutive_failures: u32,
    open_until_ms: Option<u128>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(failure_threshold: u32, cooldown_ms: u64) -> Self {
        Self {
            failure_threshold,
            cooldown_ms,
            consecutive_failures: 0,
            open_until_ms: None,
        }
    }

    /// Current consecutive-failure streak.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Configured cool-down in milliseconds.
    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms
    }

    /// Whether admission is currently frozen. The open state expires on its
    /// own once the cool-down deadline passes.
    pub fn is_open(&self, now_ms: u128) -> bool {
        self.open_until_ms.is_some_and(|until| now_ms < until)
    }

    /// The cool-down deadline while open.
    pub fn open_until_ms(&self) -> Option<u128> {
        self.open_until_ms
    }

    /// Record a success: the streak fully resets, whatever its prior value.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until_ms = None;
    }

    /// Record a failure (or timeout). Returns the cool-down deadline when
    /// this failure trips the breaker open.
    ///
    /// A failure while the streak is already at or above the threshold
    /// re-trips immediately: after a cool-down elapses the very next outcome
    /// decides whether the circuit reopens.
    pub fn record_failure(&mut self, now_ms: u128) -> Option<u128> {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.failure_threshold {
            let until = now_ms + u128::from(self.cooldown_ms);
            self.open_until_ms = Some(until);
            return Some(until);
        }
        None
    }

    /// Close the circuit if the given deadline is still the active one and
    /// has elapsed. Returns whether the circuit was closed by this call.
    /// A stale deadline (manual reset or a later re-trip) is a no-op.
    pub fn close_if_elapsed(&mut self, deadline_ms: u128, now_ms: u128) -> bool {
        if self.open_until_ms == Some(deadline_ms) && now_ms >= deadline_ms {
            self.open_until_ms = None;
            return true;
        }
        false
    }

    /// Explicit external reset: closes the circuit and zeroes the streak.
    /// Returns whether the circuit was open.
    pub fn reset(&mut self, now_ms: u128) -> bool {
        let was_open = self.is_open(now_ms);
        self.consecutive_failures = 0;
        self.open_until_ms = None;
        was_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold() {
        let mut cb = CircuitBreaker::new(3, 1000);
        assert!(cb.record_failure(100).is_none());
        assert!(cb.record_failure(200).is_none());
        let until = cb.record_failure(300).expect("third failure trips");
        assert_eq!(until, 1300);
        assert_eq!(cb.consecutive_failures(), 3);
        assert!(cb.is_open(300));
        assert!(cb.is_open(1299));
        assert!(!cb.is_open(1300));
    }

    #[test]
    fn test_success_resets_streak() {
        let mut cb = CircuitBreaker::new(3, 1000);
        cb.record_failure(100);
        cb.record_failure(200);
        assert_eq!(cb.consecutive_failures(), 2);
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(!cb.is_open(200));
        // Streak starts over; two more failures do not trip.
        cb.record_failure(300);
        assert!(cb.record_failure(400).is_none());
    }

    #[test]
    fn test_failure_after_cooldown_retrips() {
        let mut cb = CircuitBreaker::new(2, 500);
        cb.record_failure(0);
        cb.record_failure(10);
        assert!(cb.is_open(10));
        assert!(!cb.is_open(510));
        // Streak is still >= threshold: the next failure reopens at once.
        let until = cb.record_failure(600).expect("retrips");
        assert_eq!(until, 1100);
        assert!(cb.is_open(600));
    }

    #[test]
    fn test_close_if_elapsed_guards_stale_deadlines() {
        let mut cb = CircuitBreaker::new(1, 100);
        let first = cb.record_failure(0).unwrap();
        // Re-trip moves the deadline; the first timer must be a no-op.
        let second = cb.record_failure(50).unwrap();
        assert!(!cb.close_if_elapsed(first, 120));
        assert!(cb.is_open(120));
        assert!(cb.close_if_elapsed(second, 200));
        assert!(!cb.is_open(200));
    }

    #[test]
    fn test_manual_reset() {
        let mut cb = CircuitBreaker::new(1, 10_000);
        cb.record_failure(0);
        assert!(cb.is_open(1));
        assert!(cb.reset(1));
        assert!(!cb.is_open(1));
        assert_eq!(cb.consecutive_failures(), 0);
        // Resetting a closed breaker reports not-open.
        assert!(!cb.reset(2));
    }
}
