//! RedLock release algorithm implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::LockContext;
use crate::error::{ContextError, InstanceFailure, StoreError};
use crate::name::ResourceName;
use crate::token::LockToken;
use crate::traits::{DeleteOutcome, LockStore};

/// Result of a RedLock release round.
#[derive(Debug, Default)]
pub struct RedLockReleaseResult {
    /// Outcomes of the deletes that completed, by instance position.
    pub outcomes: Vec<(usize, DeleteOutcome)>,
    /// Store errors seen during the round.
    pub failures: Vec<InstanceFailure>,
    /// Set when the caller's context ended the round early.
    pub cancelled: Option<ContextError>,
}

impl RedLockReleaseResult {
    /// Counts instances among `indices` that confirmed our lease is gone.
    pub fn confirmed_among(&self, indices: &[usize]) -> usize {
        self.outcomes
            .iter()
            .filter(|(idx, outcome)| outcome.is_released() && indices.contains(idx))
            .count()
    }
}

/// Compare-deletes `token` under `key` on the instances at `targets`.
///
/// Deletes are issued in parallel, each bounded by `budget`, and the round
/// waits for all of them unless `ctx` ends first. Only keys still holding
/// `token` are removed, so a lease re-acquired by someone else after ours
/// expired is left alone.
///
/// # Arguments
///
/// * `stores` - All configured store instances
/// * `targets` - Positions of the instances to release on
/// * `key` - Resource name
/// * `token` - Fencing token written at acquisition
/// * `budget` - Per-call timeout
/// * `ctx` - Caller's cancellation context
pub async fn release_redlock<S: LockStore>(
    stores: &[Arc<S>],
    targets: &[usize],
    key: &ResourceName,
    token: &LockToken,
    budget: Duration,
    ctx: &LockContext,
) -> RedLockReleaseResult {
    let mut result = RedLockReleaseResult::default();
    if targets.is_empty() {
        return result; // Nothing to release
    }

    // Start release attempts on all targets in parallel
    let mut tasks = JoinSet::new();
    let mut task_indices = HashMap::with_capacity(targets.len());
    for &idx in targets {
        let Some(store) = stores.get(idx) else {
            continue;
        };
        let store = Arc::clone(store);
        let key = key.to_string();
        let expected = token.to_string();
        let handle = tasks.spawn(async move {
            let outcome = match tokio::time::timeout(budget, store.try_delete(&key, &expected)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(StoreError::Timeout(budget)),
            };
            (idx, outcome)
        });
        task_indices.insert(handle.id(), idx);
    }

    let done = ctx.done();
    tokio::pin!(done);

    // Wait for all tasks to complete
    loop {
        tokio::select! {
            biased;
            reason = &mut done => {
                result.cancelled = Some(reason);
                break;
            }
            joined = tasks.join_next() => {
                let Some(joined) = joined else {
                    break;
                };
                match joined {
                    Ok((idx, Ok(outcome))) => {
                        if outcome == DeleteOutcome::Mismatch {
                            debug!(instance = idx, "lease held by another token, left in place");
                        }
                        result.outcomes.push((idx, outcome));
                    }
                    Ok((idx, Err(error))) => {
                        debug!(instance = idx, error = %error, "try_delete failed");
                        result.failures.push(InstanceFailure { index: idx, error });
                    }
                    Err(join_error) => {
                        // Task panicked - treat as fault
                        warn!(error = %join_error, "try_delete task did not complete");
                        if let Some(&idx) = task_indices.get(&join_error.id()) {
                            result.failures.push(InstanceFailure {
                                index: idx,
                                error: StoreError::Backend(Box::new(join_error)),
                            });
                        }
                    }
                }
            }
        }
    }

    tasks.abort_all();
    result
}
