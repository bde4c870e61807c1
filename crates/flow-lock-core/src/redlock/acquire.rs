//! RedLock acquire algorithm implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::context::LockContext;
use crate::error::{ContextError, InstanceFailure, StoreError};
use crate::name::ResourceName;
use crate::token::LockToken;
use crate::traits::LockStore;

use super::helper::RedLockHelper;
use super::timeouts::RedLockTimeouts;

/// What we know about one instance after a fan-out round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// The instance stored our token.
    Acquired,
    /// The key was already held.
    Rejected,
    /// The call failed with a store error.
    Failed,
    /// The call was still in flight when the round ended.
    Undetermined,
}

/// Result of a RedLock acquire round.
#[derive(Debug)]
pub struct RedLockAcquireResult {
    /// Per-instance outcome, indexed by instance position.
    pub states: Vec<InstanceState>,
    /// Store errors seen during the round.
    pub failures: Vec<InstanceFailure>,
    /// When the round started.
    pub started: Instant,
    /// Time spent in the round.
    pub elapsed: Duration,
    /// Set when the caller's context ended the round.
    pub cancelled: Option<ContextError>,
}

impl RedLockAcquireResult {
    /// Returns the number of instances that stored our token.
    pub fn success_count(&self) -> usize {
        self.indices(InstanceState::Acquired).len()
    }

    /// Checks if the acquire reached majority consensus.
    pub fn is_successful(&self) -> bool {
        RedLockHelper::has_sufficient_successes(self.success_count(), self.states.len())
    }

    /// Positions of instances in the given state.
    pub fn indices(&self, state: InstanceState) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|&(_, &s)| s == state)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Instances that may hold our token: acquired plus undetermined.
    pub fn possible_holders(&self) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|&(_, &s)| matches!(s, InstanceState::Acquired | InstanceState::Undetermined))
            .map(|(idx, _)| idx)
            .collect()
    }
}

type JoinedSet = Result<(usize, Result<bool, StoreError>), JoinError>;

/// Running count of a round's answers.
struct RoundTally {
    states: Vec<InstanceState>,
    failures: Vec<InstanceFailure>,
    success_count: usize,
    fail_count: usize,
}

impl RoundTally {
    fn new(total: usize) -> Self {
        Self {
            states: vec![InstanceState::Undetermined; total],
            failures: Vec::new(),
            success_count: 0,
            fail_count: 0,
        }
    }

    fn record(&mut self, joined: JoinedSet, task_indices: &HashMap<task::Id, usize>) {
        match joined {
            Ok((idx, Ok(true))) => {
                self.states[idx] = InstanceState::Acquired;
                self.success_count += 1;
            }
            Ok((idx, Ok(false))) => {
                self.states[idx] = InstanceState::Rejected;
                self.fail_count += 1;
            }
            Ok((idx, Err(error))) => {
                debug!(instance = idx, error = %error, "try_set failed");
                self.states[idx] = InstanceState::Failed;
                self.failures.push(InstanceFailure { index: idx, error });
                self.fail_count += 1;
            }
            Err(join_error) if join_error.is_cancelled() => {}
            Err(join_error) => {
                // Task panicked - its write may or may not have landed
                warn!(error = %join_error, "try_set task did not complete");
                if let Some(&idx) = task_indices.get(&join_error.id()) {
                    self.failures.push(InstanceFailure {
                        index: idx,
                        error: StoreError::Backend(Box::new(join_error)),
                    });
                }
                self.fail_count += 1;
            }
        }
    }

    fn is_decided(&self) -> bool {
        let total = self.states.len();
        RedLockHelper::has_sufficient_successes(self.success_count, total)
            || RedLockHelper::has_too_many_failures_or_faults(self.fail_count, total)
    }
}

/// Runs one acquire round using the RedLock algorithm.
///
/// `try_set` is issued on every instance concurrently. The round ends as soon
/// as a majority is confirmed or ruled out, when the attempt budget runs out,
/// or when `ctx` is done. Calls still in flight at that point are aborted and
/// their instances reported as [`InstanceState::Undetermined`].
///
/// # Arguments
///
/// * `stores` - Store instances to acquire on
/// * `key` - Resource name
/// * `token` - Fencing token for this attempt
/// * `timeouts` - Timeout configuration
/// * `ctx` - Caller's cancellation context
pub async fn acquire_redlock<S: LockStore>(
    stores: &[Arc<S>],
    key: &ResourceName,
    token: &LockToken,
    timeouts: &RedLockTimeouts,
    ctx: &LockContext,
) -> RedLockAcquireResult {
    let started = Instant::now();
    let budget = timeouts.attempt_budget();
    let total = stores.len();

    // Start acquire attempts on all instances in parallel
    let mut tasks = JoinSet::new();
    let mut task_indices = HashMap::with_capacity(total);
    for (idx, store) in stores.iter().enumerate() {
        let store = Arc::clone(store);
        let key = key.to_string();
        let value = token.to_string();
        let ttl = timeouts.lease;
        let handle = tasks.spawn(async move {
            let outcome = match tokio::time::timeout(budget, store.try_set(&key, &value, ttl)).await
            {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(budget)),
            };
            (idx, outcome)
        });
        task_indices.insert(handle.id(), idx);
    }

    let mut tally = RoundTally::new(total);
    let mut cancelled = None;

    let round_over = tokio::time::sleep_until(started + budget);
    tokio::pin!(round_over);
    let done = ctx.done();
    tokio::pin!(done);

    loop {
        tokio::select! {
            biased;
            reason = &mut done => {
                cancelled = Some(reason);
                break;
            }
            joined = tasks.join_next() => {
                let Some(joined) = joined else {
                    break; // every instance answered
                };
                tally.record(joined, &task_indices);
                if tally.is_decided() {
                    break;
                }
            }
            _ = &mut round_over => {
                debug!(budget = ?budget, "acquire round ran out of time");
                break;
            }
        }
    }

    // Keep answers that already arrived; the rest stay Undetermined
    while let Some(joined) = tasks.try_join_next() {
        tally.record(joined, &task_indices);
    }
    tasks.abort_all();

    RedLockAcquireResult {
        states: tally.states,
        failures: tally.failures,
        started,
        elapsed: started.elapsed(),
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn timeouts() -> RedLockTimeouts {
        RedLockTimeouts::new(Duration::from_secs(1), 0.01, Duration::from_millis(50))
    }

    fn stores(n: usize) -> Vec<Arc<MemoryStore>> {
        (0..n).map(|_| Arc::new(MemoryStore::new())).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_instances_accept() {
        let stores = stores(3);
        let key = ResourceName::new("acquire-all").unwrap();
        let token = LockToken::generate();

        let result =
            acquire_redlock(&stores, &key, &token, &timeouts(), &LockContext::background()).await;

        assert!(result.is_successful());
        assert!(result.cancelled.is_none());
        assert!(result.failures.is_empty());
        assert_eq!(result.success_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_instance_left_undetermined() {
        let stores = stores(3);
        stores[2].set_latency(Duration::from_secs(5));
        let key = ResourceName::new("acquire-slow").unwrap();
        let token = LockToken::generate();

        let result =
            acquire_redlock(&stores, &key, &token, &timeouts(), &LockContext::background()).await;

        assert!(result.is_successful());
        assert_eq!(result.indices(InstanceState::Acquired), vec![0, 1]);
        assert_eq!(result.possible_holders(), vec![0, 1, 2]);
        assert_eq!(stores[2].get(key.as_str()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_majority_unavailable() {
        let stores = stores(3);
        stores[0].set_available(false);
        stores[1].set_available(false);
        let key = ResourceName::new("acquire-down").unwrap();
        let token = LockToken::generate();

        let result =
            acquire_redlock(&stores, &key, &token, &timeouts(), &LockContext::background()).await;

        assert!(!result.is_successful());
        assert_eq!(result.failures.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_round() {
        let stores = stores(3);
        for store in &stores {
            store.set_latency(Duration::from_millis(80));
        }
        let key = ResourceName::new("acquire-cancel").unwrap();
        let token = LockToken::generate();
        let ctx = LockContext::background().with_timeout(Duration::from_millis(10));

        let result = acquire_redlock(&stores, &key, &token, &timeouts(), &ctx).await;

        assert_eq!(result.cancelled, Some(ContextError::DeadlineExceeded));
        assert_eq!(result.success_count(), 0);
        assert_eq!(result.possible_holders(), vec![0, 1, 2]);
    }
}
