//! RedLock quorum arithmetic.

/// Helper functions for RedLock algorithm.
pub struct RedLockHelper;

impl RedLockHelper {
    /// Number of instances that form a strict majority of `database_count`.
    pub fn quorum(database_count: usize) -> usize {
        (database_count / 2) + 1
    }

    /// Checks if we have sufficient successes for majority consensus.
    ///
    /// For N servers, we need at least (N/2 + 1) successes.
    pub fn has_sufficient_successes(success_count: usize, database_count: usize) -> bool {
        success_count >= Self::quorum(database_count)
    }

    /// Checks if we have too many failures/faults to achieve majority.
    ///
    /// Once this many instances have failed, the rest cannot form a quorum.
    pub fn has_too_many_failures_or_faults(
        failure_or_fault_count: usize,
        database_count: usize,
    ) -> bool {
        let threshold = (database_count / 2) + (database_count % 2);
        failure_or_fault_count >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_is_strict_majority() {
        assert_eq!(RedLockHelper::quorum(1), 1);
        assert_eq!(RedLockHelper::quorum(2), 2);
        assert_eq!(RedLockHelper::quorum(3), 2);
        assert_eq!(RedLockHelper::quorum(4), 3);
        assert_eq!(RedLockHelper::quorum(5), 3);
    }

    #[test]
    fn test_failures_rule_out_majority() {
        // 3 instances: two failures leave one, which is not a majority
        assert!(!RedLockHelper::has_too_many_failures_or_faults(1, 3));
        assert!(RedLockHelper::has_too_many_failures_or_faults(2, 3));

        // 4 instances: two failures leave two, below the quorum of three
        assert!(!RedLockHelper::has_too_many_failures_or_faults(1, 4));
        assert!(RedLockHelper::has_too_many_failures_or_faults(2, 4));

        // single instance: any failure is fatal
        assert!(RedLockHelper::has_too_many_failures_or_faults(1, 1));
    }

    #[test]
    fn test_success_and_failure_thresholds_agree() {
        for n in 1..=7 {
            for failures in 0..=n {
                let possible = n - failures;
                assert_eq!(
                    RedLockHelper::has_too_many_failures_or_faults(failures, n),
                    !RedLockHelper::has_sufficient_successes(possible, n),
                    "n={n} failures={failures}"
                );
            }
        }
    }
}
