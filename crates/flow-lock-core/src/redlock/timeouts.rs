//! RedLock timeout calculations.

use std::time::Duration;

/// Fixed part of the clock drift allowance, added on top of the
/// proportional part.
pub const DRIFT_CONSTANT: Duration = Duration::from_millis(2);

/// Timing parameters for one acquisition.
#[derive(Debug, Clone)]
pub struct RedLockTimeouts {
    /// Lease duration (TTL set on the store keys).
    pub lease: Duration,
    /// Fraction of the lease reserved for clock drift between instances.
    pub drift_factor: f64,
    /// Lower bound for the per-attempt time budget.
    pub min_attempt_budget: Duration,
}

impl RedLockTimeouts {
    /// Creates a new timeout configuration.
    pub fn new(lease: Duration, drift_factor: f64, min_attempt_budget: Duration) -> Self {
        Self {
            lease,
            drift_factor,
            min_attempt_budget,
        }
    }

    /// Time allowed for one fan-out round, and for each store call in it.
    ///
    /// A tenth of the lease, never below `min_attempt_budget`.
    pub fn attempt_budget(&self) -> Duration {
        (self.lease / 10).max(self.min_attempt_budget)
    }

    /// Safety margin subtracted from the lease before declaring success.
    pub fn drift(&self) -> Duration {
        self.lease.mul_f64(self.drift_factor) + DRIFT_CONSTANT
    }

    /// Remaining validity after spending `elapsed` on acquisition.
    ///
    /// `None` when the lease may already be gone on some instance.
    pub fn validity(&self, elapsed: Duration) -> Option<Duration> {
        self.lease
            .checked_sub(elapsed)
            .and_then(|left| left.checked_sub(self.drift()))
            .filter(|left| !left.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeouts(lease_ms: u64) -> RedLockTimeouts {
        RedLockTimeouts::new(
            Duration::from_millis(lease_ms),
            0.01,
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_attempt_budget_is_tenth_of_lease() {
        assert_eq!(timeouts(1000).attempt_budget(), Duration::from_millis(100));
        assert_eq!(timeouts(15_000).attempt_budget(), Duration::from_millis(1500));
    }

    #[test]
    fn test_attempt_budget_has_floor() {
        assert_eq!(timeouts(100).attempt_budget(), Duration::from_millis(50));
    }

    #[test]
    fn test_drift() {
        assert_eq!(timeouts(1000).drift(), Duration::from_millis(12));
    }

    #[test]
    fn test_validity() {
        let t = timeouts(1000);
        assert_eq!(
            t.validity(Duration::from_millis(100)),
            Some(Duration::from_millis(888))
        );
        assert_eq!(t.validity(Duration::from_millis(988)), None);
        assert_eq!(t.validity(Duration::from_millis(2000)), None);
    }
}
