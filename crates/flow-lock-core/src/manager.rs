//! Quorum lock manager.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{Span, debug, instrument, warn};
use uuid::Uuid;

use crate::context::LockContext;
use crate::error::{LockError, LockResult};
use crate::handle::ReleaseHandle;
use crate::name::ResourceName;
use crate::redlock::acquire::{InstanceState, acquire_redlock};
use crate::redlock::release::release_redlock;
use crate::redlock::{RedLockHelper, RedLockTimeouts};
use crate::token::LockToken;
use crate::traits::{FlowLocker, LockStore};

/// Lease used when a caller passes a zero duration.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(15);
/// Longest lease a manager accepts.
pub const MAX_LEASE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Fraction of the lease reserved for clock drift.
pub const DEFAULT_DRIFT_FACTOR: f64 = 0.01;
/// Floor for the per-attempt time budget.
pub const DEFAULT_MIN_ATTEMPT_BUDGET: Duration = Duration::from_millis(50);
/// Bounds of the random pause between attempts.
pub const DEFAULT_RETRY_DELAY: (Duration, Duration) =
    (Duration::from_millis(50), Duration::from_millis(250));

/// Tuning knobs shared by every acquisition of a manager.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Lease substituted for a zero lease duration.
    pub default_lease: Duration,
    /// Attempts per acquire call. Always at least one.
    pub tries: u32,
    /// Fraction of the lease reserved for clock drift.
    pub drift_factor: f64,
    /// Floor for the per-attempt time budget.
    pub min_attempt_budget: Duration,
    /// Shortest pause between attempts.
    pub retry_delay_min: Duration,
    /// Longest pause between attempts.
    pub retry_delay_max: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            default_lease: DEFAULT_LEASE,
            tries: 1,
            drift_factor: DEFAULT_DRIFT_FACTOR,
            min_attempt_budget: DEFAULT_MIN_ATTEMPT_BUDGET,
            retry_delay_min: DEFAULT_RETRY_DELAY.0,
            retry_delay_max: DEFAULT_RETRY_DELAY.1,
        }
    }
}

impl LockOptions {
    fn validate(&self) -> LockResult<()> {
        if self.default_lease.is_zero() {
            return Err(LockError::InvalidConfig(
                "default lease must be positive".to_string(),
            ));
        }
        if self.default_lease > MAX_LEASE {
            return Err(LockError::InvalidConfig(format!(
                "default lease {:?} exceeds the maximum of {MAX_LEASE:?}",
                self.default_lease
            )));
        }
        if self.tries == 0 {
            return Err(LockError::InvalidConfig(
                "tries must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.drift_factor) {
            return Err(LockError::InvalidConfig(format!(
                "drift factor {} must be in [0, 1)",
                self.drift_factor
            )));
        }
        if self.retry_delay_min > self.retry_delay_max {
            return Err(LockError::InvalidConfig(
                "retry delay minimum exceeds maximum".to_string(),
            ));
        }
        Ok(())
    }

    fn retry_delay(&self) -> Duration {
        if self.retry_delay_min == self.retry_delay_max {
            return self.retry_delay_min;
        }
        rand::thread_rng().gen_range(self.retry_delay_min..=self.retry_delay_max)
    }
}

/// Builder for [`LockManager`].
pub struct LockManagerBuilder<S> {
    stores: Vec<Arc<S>>,
    options: LockOptions,
}

impl<S: LockStore> LockManagerBuilder<S> {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            stores: Vec::new(),
            options: LockOptions::default(),
        }
    }

    /// Adds a store instance.
    ///
    /// Use an odd number of independent instances (ideally 3 or 5).
    pub fn store(mut self, store: impl Into<Arc<S>>) -> Self {
        self.stores.push(store.into());
        self
    }

    /// Adds several store instances.
    pub fn stores<I>(mut self, stores: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arc<S>>,
    {
        self.stores.extend(stores.into_iter().map(Into::into));
        self
    }

    /// Sets the lease used when `acquire` is given a zero duration.
    ///
    /// Default: 15 seconds
    pub fn default_lease(mut self, lease: Duration) -> Self {
        self.options.default_lease = lease;
        self
    }

    /// Sets the number of attempts per acquire call.
    ///
    /// Default: 1
    pub fn tries(mut self, tries: u32) -> Self {
        self.options.tries = tries;
        self
    }

    /// Sets the fraction of the lease reserved for clock drift.
    ///
    /// Default: 0.01
    pub fn drift_factor(mut self, factor: f64) -> Self {
        self.options.drift_factor = factor;
        self
    }

    /// Sets the floor for the per-attempt time budget.
    ///
    /// Default: 50ms
    pub fn min_attempt_budget(mut self, budget: Duration) -> Self {
        self.options.min_attempt_budget = budget;
        self
    }

    /// Sets the range of the random pause between attempts.
    ///
    /// Default: 50-250ms
    pub fn retry_delay(mut self, min: Duration, max: Duration) -> Self {
        self.options.retry_delay_min = min;
        self.options.retry_delay_max = max;
        self
    }

    /// Replaces all options at once.
    pub fn options(mut self, options: LockOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the manager.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if no store was added or an option is out of range.
    pub fn build(self) -> LockResult<LockManager<S>> {
        if self.stores.is_empty() {
            return Err(LockError::InvalidConfig(
                "no store instances provided".to_string(),
            ));
        }
        self.options.validate()?;

        Ok(LockManager {
            stores: Arc::new(self.stores),
            options: self.options,
        })
    }
}

impl<S: LockStore> Default for LockManagerBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Acquires and releases leases by quorum over independent store instances.
///
/// Holds no lock state of its own; every lease lives in the stores.
pub struct LockManager<S> {
    stores: Arc<Vec<Arc<S>>>,
    options: LockOptions,
}

impl<S> Clone for LockManager<S> {
    fn clone(&self) -> Self {
        Self {
            stores: Arc::clone(&self.stores),
            options: self.options.clone(),
        }
    }
}

impl<S: LockStore> LockManager<S> {
    /// Returns a new builder for configuring the manager.
    pub fn builder() -> LockManagerBuilder<S> {
        LockManagerBuilder::new()
    }

    /// Creates a manager over `stores` with default options.
    pub fn new<I>(stores: I) -> LockResult<Self>
    where
        I: IntoIterator,
        I::Item: Into<Arc<S>>,
    {
        Self::builder().stores(stores).build()
    }

    /// The configured options.
    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// The configured store instances.
    pub fn stores(&self) -> &[Arc<S>] {
        &self.stores
    }

    /// Acquires a lease on `resource` for `lease` (or the default lease when zero).
    ///
    /// # Returns
    ///
    /// * `Ok(handle)` - A quorum of instances accepted our token in time
    /// * `Err(LockError::PreconditionFailed)` - `ctx` was already done; no store was touched
    /// * `Err(LockError::InvalidName)` - `resource` is empty
    /// * `Err(LockError::InvalidConfig)` - `lease` exceeds [`MAX_LEASE`]
    /// * `Err(LockError::AcquisitionFailed)` - No quorum after all attempts
    /// * `Err(LockError::Cancelled)` - `ctx` ended mid-attempt
    ///
    /// On every failure the token is compare-deleted from the instances that
    /// may have stored it before this returns.
    pub async fn acquire(
        &self,
        ctx: &LockContext,
        resource: impl AsRef<str>,
        lease: Duration,
    ) -> LockResult<ReleaseHandle<S>> {
        if let Some(reason) = ctx.err() {
            return Err(LockError::PreconditionFailed(reason));
        }
        let resource = ResourceName::new(resource.as_ref())?;
        self.acquire_resource(ctx, resource, lease).await
    }

    /// Acquires a lease on an already validated resource name.
    #[instrument(
        skip(self, ctx),
        fields(
            lock.resource = %resource,
            lease = ?lease,
            instances = self.stores.len(),
            backend = std::any::type_name::<S>(),
            acquired = tracing::field::Empty,
            attempts = tracing::field::Empty,
        )
    )]
    pub async fn acquire_resource(
        &self,
        ctx: &LockContext,
        resource: ResourceName,
        lease: Duration,
    ) -> LockResult<ReleaseHandle<S>> {
        if let Some(reason) = ctx.err() {
            Span::current().record("acquired", false);
            return Err(LockError::PreconditionFailed(reason));
        }

        let lease = if lease.is_zero() {
            self.options.default_lease
        } else {
            lease
        };
        if lease > MAX_LEASE {
            Span::current().record("acquired", false);
            return Err(LockError::InvalidConfig(format!(
                "lease {lease:?} exceeds the maximum of {MAX_LEASE:?}"
            )));
        }
        let timeouts = RedLockTimeouts::new(
            lease,
            self.options.drift_factor,
            self.options.min_attempt_budget,
        );

        let mut last_error = None;
        for attempt in 1..=self.options.tries {
            if attempt > 1 {
                let delay = self.options.retry_delay();
                debug!(attempt, delay = ?delay, "retrying acquisition");
                tokio::select! {
                    biased;
                    reason = ctx.done() => {
                        Span::current().record("acquired", false);
                        return Err(LockError::Cancelled(reason));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Span::current().record("attempts", attempt);

            match self.try_acquire_once(ctx, &resource, &timeouts).await {
                Ok(handle) => {
                    Span::current().record("acquired", true);
                    return Ok(handle);
                }
                Err(error @ LockError::Cancelled(_)) => {
                    Span::current().record("acquired", false);
                    return Err(error);
                }
                Err(error) => {
                    debug!(attempt, error = %error, "acquisition attempt failed");
                    last_error = Some(error);
                }
            }
        }

        Span::current().record("acquired", false);
        Err(last_error.unwrap_or_else(|| {
            LockError::InvalidConfig("tries must be at least 1".to_string())
        }))
    }

    async fn try_acquire_once(
        &self,
        ctx: &LockContext,
        resource: &ResourceName,
        timeouts: &RedLockTimeouts,
    ) -> LockResult<ReleaseHandle<S>> {
        let token = LockToken::generate();
        let total = self.stores.len();
        let result = acquire_redlock(&self.stores, resource, &token, timeouts, ctx).await;

        if result.cancelled.is_none() && result.is_successful() {
            if let Some(validity) = timeouts.validity(result.elapsed) {
                debug!(
                    acquired = result.success_count(),
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    validity_ms = validity.as_millis() as u64,
                    "quorum reached"
                );
                return Ok(ReleaseHandle::new(
                    resource.clone(),
                    token,
                    Arc::clone(&self.stores),
                    result.indices(InstanceState::Acquired),
                    result.indices(InstanceState::Undetermined),
                    timeouts.attempt_budget(),
                    result.started + timeouts.lease - timeouts.drift(),
                ));
            }
            debug!(
                elapsed_ms = result.elapsed.as_millis() as u64,
                "quorum reached too late to be valid"
            );
        }

        // Undo partial writes, even for a caller whose context is done
        let cleanup = release_redlock(
            &self.stores,
            &result.possible_holders(),
            resource,
            &token,
            timeouts.attempt_budget(),
            &LockContext::background(),
        )
        .await;
        for failure in &cleanup.failures {
            warn!(
                lock.resource = %resource,
                instance = failure.index,
                error = %failure.error,
                "failed to clean up partial acquisition; lease will expire on its own"
            );
        }

        if let Some(reason) = result.cancelled {
            return Err(LockError::Cancelled(reason));
        }

        let acquired = result.success_count();
        let mut failures = result.failures;
        failures.extend(cleanup.failures);
        Err(LockError::AcquisitionFailed {
            acquired,
            required: RedLockHelper::quorum(total),
            elapsed: result.elapsed,
            failures,
        })
    }

    /// Acquires the lease for a flow under its `flow:lock:<id>` key.
    pub async fn lock_flow(
        &self,
        ctx: &LockContext,
        flow_id: Uuid,
        lease: Duration,
    ) -> LockResult<ReleaseHandle<S>> {
        self.acquire_resource(ctx, ResourceName::for_flow(flow_id), lease)
            .await
    }
}

impl<S: LockStore> FlowLocker for LockManager<S> {
    type Handle = ReleaseHandle<S>;

    async fn lock(&self, ctx: &LockContext, flow_id: Uuid) -> LockResult<Self::Handle> {
        self.lock_flow(ctx, flow_id, Duration::ZERO).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn test_builder_requires_stores() {
        let result = LockManager::<MemoryStore>::builder().build();
        assert!(matches!(result, Err(LockError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_zero_tries() {
        let result = LockManager::<MemoryStore>::builder()
            .store(MemoryStore::new())
            .tries(0)
            .build();
        assert!(matches!(result, Err(LockError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_inverted_retry_delay() {
        let result = LockManager::<MemoryStore>::builder()
            .store(MemoryStore::new())
            .retry_delay(Duration::from_millis(300), Duration::from_millis(100))
            .build();
        assert!(matches!(result, Err(LockError::InvalidConfig(_))));
    }

    #[test]
    fn test_defaults() {
        let manager = LockManager::<MemoryStore>::new([MemoryStore::new()]).unwrap();
        assert_eq!(manager.options().default_lease, Duration::from_secs(15));
        assert_eq!(manager.options().tries, 1);
        assert_eq!(manager.stores().len(), 1);
    }

    #[test]
    fn test_retry_delay_within_bounds() {
        let options = LockOptions::default();
        for _ in 0..100 {
            let delay = options.retry_delay();
            assert!(delay >= options.retry_delay_min && delay <= options.retry_delay_max);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_lease_uses_default() {
        let store = Arc::new(MemoryStore::new());
        let manager = LockManager::<MemoryStore>::builder()
            .store(Arc::clone(&store))
            .default_lease(Duration::from_secs(3))
            .build()
            .unwrap();

        let handle = manager
            .acquire(&LockContext::background(), "default-lease", Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(store.ttl("default-lease"), Some(Duration::from_secs(3)));
        handle.release(&LockContext::background()).await.unwrap();
    }

    #[test]
    fn test_builder_rejects_oversized_default_lease() {
        let result = LockManager::<MemoryStore>::builder()
            .store(MemoryStore::new())
            .default_lease(MAX_LEASE + Duration::from_secs(1))
            .build();
        assert!(matches!(result, Err(LockError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_lease_rejected_without_store_contact() {
        let store = Arc::new(MemoryStore::new());
        let manager = LockManager::<MemoryStore>::new([Arc::clone(&store)]).unwrap();

        let result = manager
            .acquire(&LockContext::background(), "forever", Duration::MAX)
            .await;

        assert!(matches!(result, Err(LockError::InvalidConfig(_))));
        assert_eq!(store.set_calls(), 0);

        let handle = manager
            .acquire(&LockContext::background(), "forever", MAX_LEASE)
            .await
            .unwrap();
        handle.release(&LockContext::background()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_resource_rejected_without_store_contact() {
        let store = Arc::new(MemoryStore::new());
        let manager = LockManager::<MemoryStore>::new([Arc::clone(&store)]).unwrap();

        let result = manager
            .acquire(&LockContext::background(), "", Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(LockError::InvalidName(_))));
        assert_eq!(store.set_calls(), 0);
    }
}
