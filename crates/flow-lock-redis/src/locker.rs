//! Redis flow locker.

use std::sync::Arc;
use std::time::Duration;

use flow_lock_core::context::LockContext;
use flow_lock_core::error::{LockError, LockResult, StoreError};
use flow_lock_core::handle::ReleaseHandle;
use flow_lock_core::manager::{LockManager, LockOptions};
use flow_lock_core::redlock::RedLockHelper;
use flow_lock_core::traits::FlowLocker;
use fred::prelude::*;
use fred::types::ReconnectPolicy;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RedisLockerConfig;
use crate::store::{RedisStore, default_reconnect_policy};

/// Release handle for a lease held on Redis servers.
pub type RedisReleaseHandle = ReleaseHandle<RedisStore>;

/// Builder for Redis flow locker configuration.
pub struct RedisFlowLockerBuilder {
    urls: Vec<String>,
    clients: Vec<RedisClient>,
    password: Option<String>,
    reconnect: ReconnectPolicy,
    options: LockOptions,
}

impl RedisFlowLockerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            urls: vec![],
            clients: vec![],
            password: None,
            reconnect: default_reconnect_policy(),
            options: LockOptions::default(),
        }
    }

    /// Starts from a deserialized configuration.
    pub fn from_config(config: &RedisLockerConfig) -> Self {
        Self {
            urls: config.urls(),
            clients: vec![],
            password: config.password.clone(),
            reconnect: default_reconnect_policy(),
            options: config.lock_options(),
        }
    }

    /// Adds a Redis server URL.
    ///
    /// For quorum locking, add multiple independent servers (ideally 3 or 5).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    /// Adds multiple Redis server URLs.
    pub fn urls(mut self, urls: &[impl AsRef<str>]) -> Self {
        for url in urls {
            self.urls.push(url.as_ref().to_string());
        }
        self
    }

    /// Uses an existing, connected Redis client.
    pub fn client(mut self, client: RedisClient) -> Self {
        self.clients.push(client);
        self
    }

    /// Sets the password used for every URL added to this builder.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets how clients opened from URLs reconnect after losing their server.
    ///
    /// Default: unlimited attempts, exponential backoff from 100ms to 10s
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the lease duration.
    ///
    /// Default: 15 seconds
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.options.default_lease = expiry;
        self
    }

    /// Sets the number of attempts per lock call.
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

    /// Sets the range of the random pause between attempts.
    pub fn retry_delay(mut self, min: Duration, max: Duration) -> Self {
        self.options.retry_delay_min = min;
        self.options.retry_delay_max = max;
        self
    }

    /// Connects to every URL and builds the locker.
    ///
    /// Servers that are down at startup are kept and keep reconnecting in
    /// the background, as long as a quorum of all servers is reachable.
    pub async fn build(self) -> LockResult<RedisFlowLocker> {
        let mut stores: Vec<Arc<RedisStore>> = self
            .clients
            .into_iter()
            .map(|client| Arc::new(RedisStore::new(client)))
            .collect();

        let mut opened = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            let store = RedisStore::open(url, self.password.as_deref(), self.reconnect.clone())?;
            opened.push(store);
        }

        let mut unreachable = Vec::new();
        for store in opened {
            if let Err(error) = store.wait_connected().await {
                unreachable.push((stores.len(), error));
            }
            stores.push(Arc::new(store));
        }

        if stores.is_empty() {
            return Err(LockError::InvalidConfig(
                "no Redis clients or URLs provided".to_string(),
            ));
        }
        ensure_quorum_reachable(stores.len(), unreachable)?;

        info!(servers = stores.len(), "redis flow locker connected");

        let manager = LockManager::<RedisStore>::builder()
            .stores(stores)
            .options(self.options)
            .build()?;

        Ok(RedisFlowLocker { manager })
    }
}

/// Fails unless a quorum of `total` servers answered the initial connect.
fn ensure_quorum_reachable(total: usize, unreachable: Vec<(usize, StoreError)>) -> LockResult<()> {
    for (server, error) in &unreachable {
        warn!(server, error = %error, "redis server unreachable at startup, reconnecting in background");
    }
    if total - unreachable.len() >= RedLockHelper::quorum(total) {
        return Ok(());
    }
    match unreachable.into_iter().next() {
        Some((_, error)) => Err(LockError::StoreUnavailable(error)),
        None => Err(LockError::InvalidConfig(
            "no Redis clients or URLs provided".to_string(),
        )),
    }
}

impl Default for RedisFlowLockerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Flow locker backed by one or more Redis servers.
#[derive(Clone)]
pub struct RedisFlowLocker {
    manager: LockManager<RedisStore>,
}

impl RedisFlowLocker {
    /// Returns a new builder for configuring the locker.
    pub fn builder() -> RedisFlowLockerBuilder {
        RedisFlowLockerBuilder::new()
    }

    /// Creates a locker using the specified Redis URL.
    pub async fn new(url: impl Into<String>) -> LockResult<Self> {
        Self::builder().url(url).build().await
    }

    /// Creates a locker from a deserialized configuration.
    pub async fn from_config(config: &RedisLockerConfig) -> LockResult<Self> {
        RedisFlowLockerBuilder::from_config(config).build().await
    }

    /// The underlying quorum manager.
    pub fn manager(&self) -> &LockManager<RedisStore> {
        &self.manager
    }

    /// Acquires a lease on an arbitrary resource name.
    pub async fn acquire(
        &self,
        ctx: &LockContext,
        resource: impl AsRef<str>,
        lease: Duration,
    ) -> LockResult<RedisReleaseHandle> {
        self.manager.acquire(ctx, resource, lease).await
    }
}

impl FlowLocker for RedisFlowLocker {
    type Handle = RedisReleaseHandle;

    async fn lock(&self, ctx: &LockContext, flow_id: Uuid) -> LockResult<Self::Handle> {
        self.manager.lock(ctx, flow_id).await
    }
}
