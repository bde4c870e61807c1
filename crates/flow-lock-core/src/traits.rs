//! Core traits for flow locks.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::context::LockContext;
use crate::error::{LockResult, StoreError};
use crate::name::ResourceName;
use crate::token::LockToken;

// ============================================================================
// Store Trait
// ============================================================================

/// Result of a compare-and-delete against one store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The key held the expected value and was removed.
    Deleted,
    /// The key was not present (already released or expired).
    Absent,
    /// The key holds a different value; nothing was removed.
    Mismatch,
}

impl DeleteOutcome {
    /// True only when this call removed the key.
    pub fn is_deleted(self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// True when our lease is gone from the instance, whoever removed it.
    pub fn is_released(self) -> bool {
        matches!(self, Self::Deleted | Self::Absent)
    }
}

/// One independent key/value store instance.
///
/// Both operations must be atomic as seen by every client of the instance.
/// Contention is reported through the return value; `Err` is reserved for
/// transport, timeout, and authentication problems.
///
/// # Example
///
/// ```rust,ignore
/// let store = MemoryStore::new();
/// assert!(store.try_set("flow:lock:a", "token-1", Duration::from_secs(5)).await?);
/// assert!(!store.try_set("flow:lock:a", "token-2", Duration::from_secs(5)).await?);
/// assert!(store.try_delete("flow:lock:a", "token-1").await?.is_deleted());
/// ```
pub trait LockStore: Send + Sync + 'static {
    /// Stores `value` under `key` with the given time to live, only if `key`
    /// is absent. Returns whether the value was stored.
    fn try_set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Removes `key` only if it currently holds `expected`.
    fn try_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> impl Future<Output = Result<DeleteOutcome, StoreError>> + Send;
}

// ============================================================================
// Lock Handle Trait
// ============================================================================

/// Handle to an acquired lease.
///
/// Dropping the handle does not release anything; the lease then expires on
/// its own. Call `release()` to free the resource early.
pub trait LockHandle: Send + Sync {
    /// The locked resource.
    fn resource(&self) -> &ResourceName;

    /// The fencing token written for this acquisition.
    fn token(&self) -> &LockToken;

    /// Instant after which the lease must be assumed expired.
    fn valid_until(&self) -> Instant;

    /// Releases the lease on every instance that holds our token.
    ///
    /// A second call after a completed release returns `Ok(())`.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - A quorum of instances confirmed the lease is gone
    /// * `Err(LockError::PreconditionFailed)` - `ctx` was already done; nothing was touched
    /// * `Err(LockError::ReleaseUncertain)` - Release could not be confirmed; treat the
    ///   lease as expiring naturally rather than retrying
    fn release(&self, ctx: &LockContext) -> impl Future<Output = LockResult<()>> + Send;
}

// ============================================================================
// Flow Locker Trait
// ============================================================================

/// Serializes work on flows across processes.
///
/// # Example
///
/// ```rust,ignore
/// async fn run_flow(locker: &impl FlowLocker, flow_id: Uuid) -> LockResult<()> {
///     let ctx = LockContext::background();
///     let handle = locker.lock(&ctx, flow_id).await?;
///
///     execute(flow_id).await;
///
///     handle.release(&ctx).await
/// }
/// ```
pub trait FlowLocker: Send + Sync {
    /// The handle type returned when a flow is locked.
    type Handle: LockHandle;

    /// Locks `flow_id` for the configured default lease.
    ///
    /// # Returns
    ///
    /// * `Ok(handle)` - A quorum of instances accepted our token
    /// * `Err(LockError::PreconditionFailed)` - `ctx` was already done
    /// * `Err(LockError::AcquisitionFailed)` - The flow is locked elsewhere or too
    ///   many instances failed; safe to retry later
    /// * `Err(LockError::Cancelled)` - `ctx` ended mid-attempt; partial writes were cleaned up
    fn lock(
        &self,
        ctx: &LockContext,
        flow_id: Uuid,
    ) -> impl Future<Output = LockResult<Self::Handle>> + Send;
}
