//! Release handle for an acquired lease.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::context::LockContext;
use crate::error::{LockError, LockResult};
use crate::name::ResourceName;
use crate::redlock::RedLockHelper;
use crate::redlock::release::release_redlock;
use crate::token::LockToken;
use crate::traits::{LockHandle, LockStore};

/// Handle for a lease held on a quorum of store instances.
///
/// The handle is the only way to release the lease. Dropping it without
/// calling [`release`](Self::release) leaves the lease to expire.
pub struct ReleaseHandle<S: LockStore> {
    /// Locked resource.
    resource: ResourceName,
    /// Fencing token written on the holders.
    token: LockToken,
    /// All configured store instances.
    stores: Arc<Vec<Arc<S>>>,
    /// Instances that confirmed our write.
    holders: Vec<usize>,
    /// Instances whose write was still in flight when quorum was reached.
    undetermined: Vec<usize>,
    /// Per-call timeout for deletes.
    call_budget: Duration,
    /// Instant after which the lease must be assumed expired.
    valid_until: Instant,
    /// Set once a release round has started.
    released: AtomicBool,
}

impl<S: LockStore> ReleaseHandle<S> {
    pub(crate) fn new(
        resource: ResourceName,
        token: LockToken,
        stores: Arc<Vec<Arc<S>>>,
        holders: Vec<usize>,
        undetermined: Vec<usize>,
        call_budget: Duration,
        valid_until: Instant,
    ) -> Self {
        Self {
            resource,
            token,
            stores,
            holders,
            undetermined,
            call_budget,
            valid_until,
            released: AtomicBool::new(false),
        }
    }

    /// The locked resource.
    pub fn resource(&self) -> &ResourceName {
        &self.resource
    }

    /// The fencing token written for this acquisition.
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Positions of the instances that stored our token.
    pub fn holders(&self) -> &[usize] {
        &self.holders
    }

    /// Positions of the instances whose write was still in flight at quorum.
    pub fn undetermined(&self) -> &[usize] {
        &self.undetermined
    }

    /// Instant after which the lease must be assumed expired.
    pub fn valid_until(&self) -> Instant {
        self.valid_until
    }

    /// True once the validity window has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.valid_until
    }

    /// True once a release round has started.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Releases the lease. See [`LockHandle::release`].
    #[instrument(
        skip(self, ctx),
        fields(lock.resource = %self.resource, holders = self.holders.len())
    )]
    pub async fn release(&self, ctx: &LockContext) -> LockResult<()> {
        if self.is_released() {
            debug!("lease already released");
            return Ok(());
        }
        if let Some(reason) = ctx.err() {
            return Err(LockError::PreconditionFailed(reason));
        }
        if self.released.swap(true, Ordering::AcqRel) {
            debug!("lease already released");
            return Ok(());
        }

        // Undetermined instances may hold our token too; compare-delete is
        // harmless where they do not.
        let mut targets = self.holders.clone();
        targets.extend_from_slice(&self.undetermined);

        let result = release_redlock(
            &self.stores,
            &targets,
            &self.resource,
            &self.token,
            self.call_budget,
            ctx,
        )
        .await;

        let confirmed = result.confirmed_among(&self.holders);
        let required = RedLockHelper::quorum(self.holders.len());
        if confirmed >= required {
            debug!(confirmed, "lease released");
            return Ok(());
        }

        warn!(
            confirmed,
            required,
            cancelled = ?result.cancelled,
            "could not confirm release on a quorum; lease will expire on its own"
        );
        Err(LockError::ReleaseUncertain {
            confirmed,
            required,
            cancelled: result.cancelled,
            failures: result.failures,
        })
    }
}

impl<S: LockStore> LockHandle for ReleaseHandle<S> {
    fn resource(&self) -> &ResourceName {
        &self.resource
    }

    fn token(&self) -> &LockToken {
        &self.token
    }

    fn valid_until(&self) -> Instant {
        self.valid_until
    }

    async fn release(&self, ctx: &LockContext) -> LockResult<()> {
        ReleaseHandle::release(self, ctx).await
    }
}

impl<S: LockStore> Drop for ReleaseHandle<S> {
    fn drop(&mut self) {
        // Can't release asynchronously here; the lease expires naturally
        if !self.released.load(Ordering::Acquire) {
            debug!(
                lock.resource = %self.resource,
                "release handle dropped while holding lease"
            );
        }
    }
}

impl<S: LockStore> std::fmt::Debug for ReleaseHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseHandle")
            .field("resource", &self.resource)
            .field("token", &self.token)
            .field("holders", &self.holders)
            .field("undetermined", &self.undetermined)
            .field("valid_until", &self.valid_until)
            .field("released", &self.is_released())
            .finish()
    }
}
