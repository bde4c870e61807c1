//! Single-process flow locker for exercising code written against `FlowLocker`.

use flow_lock_core::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Handle returned by [`MockFlowLocker`].
pub struct MockHandle {
    flow_id: Uuid,
    resource: ResourceName,
    token: LockToken,
    valid_until: Instant,
    held: Arc<Mutex<HashSet<Uuid>>>,
    released: AtomicBool,
}

impl LockHandle for MockHandle {
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
        if self.released.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(reason) = ctx.err() {
            return Err(LockError::PreconditionFailed(reason));
        }
        if !self.released.swap(true, Ordering::AcqRel) {
            self.held.lock().unwrap().remove(&self.flow_id);
        }
        Ok(())
    }
}

/// Locks flows in a process-local set. Leases never expire.
pub struct MockFlowLocker {
    held: Arc<Mutex<HashSet<Uuid>>>,
    lease: Duration,
}

impl MockFlowLocker {
    pub fn new() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
            lease: Duration::from_secs(15),
        }
    }

    pub fn is_locked(&self, flow_id: Uuid) -> bool {
        self.held.lock().unwrap().contains(&flow_id)
    }
}

impl Default for MockFlowLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowLocker for MockFlowLocker {
    type Handle = MockHandle;

    async fn lock(&self, ctx: &LockContext, flow_id: Uuid) -> LockResult<Self::Handle> {
        if let Some(reason) = ctx.err() {
            return Err(LockError::PreconditionFailed(reason));
        }

        let started = Instant::now();
        if !self.held.lock().unwrap().insert(flow_id) {
            return Err(LockError::AcquisitionFailed {
                acquired: 0,
                required: 1,
                elapsed: started.elapsed(),
                failures: Vec::new(),
            });
        }

        Ok(MockHandle {
            flow_id,
            resource: ResourceName::for_flow(flow_id),
            token: LockToken::generate(),
            valid_until: started + self.lease,
            held: Arc::clone(&self.held),
            released: AtomicBool::new(false),
        })
    }
}
