//! Helpers for building managers over in-memory store instances.

use flow_lock_core::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// Lease used by most scenarios.
pub const LEASE: Duration = Duration::from_millis(1000);

/// A set of independent in-memory instances and a manager over them.
pub struct TestCluster {
    pub stores: Vec<Arc<MemoryStore>>,
    pub manager: LockManager<MemoryStore>,
}

impl TestCluster {
    /// Creates `size` instances with default manager options.
    pub fn new(size: usize) -> Self {
        Self::with_builder(size, |builder| builder)
    }

    /// Creates `size` instances and lets the caller tune the manager.
    pub fn with_builder(
        size: usize,
        configure: impl FnOnce(LockManagerBuilder<MemoryStore>) -> LockManagerBuilder<MemoryStore>,
    ) -> Self {
        let stores: Vec<Arc<MemoryStore>> =
            (0..size).map(|_| Arc::new(MemoryStore::new())).collect();
        let builder = LockManager::<MemoryStore>::builder().stores(stores.iter().cloned());
        let manager = configure(builder).build().unwrap();
        Self { stores, manager }
    }

    /// A second manager over the same instances, as another process would have.
    pub fn other_process(&self) -> LockManager<MemoryStore> {
        LockManager::<MemoryStore>::builder()
            .stores(self.stores.iter().cloned())
            .options(self.manager.options().clone())
            .build()
            .unwrap()
    }

    /// Instances currently holding `token` under `key`.
    pub fn holders_of(&self, key: &str, token: &str) -> usize {
        self.stores
            .iter()
            .filter(|store| store.get(key).as_deref() == Some(token))
            .count()
    }

    /// Total `try_set` calls across instances.
    pub fn set_calls(&self) -> usize {
        self.stores.iter().map(|store| store.set_calls()).sum()
    }

    /// Total `try_delete` calls across instances.
    pub fn delete_calls(&self) -> usize {
        self.stores.iter().map(|store| store.delete_calls()).sum()
    }
}
