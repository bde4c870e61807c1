//! Deserializable configuration for Redis flow lockers.

use std::time::Duration;

use flow_lock_core::manager::{DEFAULT_DRIFT_FACTOR, DEFAULT_LEASE, LockOptions};
use serde::Deserialize;

/// Settings for a [`RedisFlowLocker`](crate::RedisFlowLocker).
///
/// Durations are in milliseconds. Every field has a default, so partial
/// documents are accepted:
///
/// ```json
/// {
///   "addresses": ["redis-a:6379", "redis-b:6379", "redis-c:6379"],
///   "password": "secret",
///   "expiry_ms": 15000
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisLockerConfig {
    /// A single server, as `host:port` or a `redis://` URL.
    pub address: Option<String>,
    /// Independent servers for quorum locking.
    pub addresses: Vec<String>,
    /// Password applied to every server.
    pub password: Option<String>,
    /// Lease duration.
    pub expiry_ms: u64,
    /// Attempts per lock call.
    pub tries: u32,
    /// Fraction of the lease reserved for clock drift.
    pub drift_factor: f64,
}

impl Default for RedisLockerConfig {
    fn default() -> Self {
        Self {
            address: None,
            addresses: Vec::new(),
            password: None,
            expiry_ms: DEFAULT_LEASE.as_millis() as u64,
            tries: 1,
            drift_factor: DEFAULT_DRIFT_FACTOR,
        }
    }
}

impl RedisLockerConfig {
    /// Server URLs, `address` first, with `redis://` added where missing.
    pub fn urls(&self) -> Vec<String> {
        self.address
            .iter()
            .chain(self.addresses.iter())
            .map(|address| address.trim())
            .filter(|address| !address.is_empty())
            .map(|address| {
                if address.contains("://") {
                    address.to_string()
                } else {
                    format!("redis://{address}")
                }
            })
            .collect()
    }

    /// Lease duration; zero falls back to the default lease.
    pub fn expiry(&self) -> Duration {
        match self.expiry_ms {
            0 => DEFAULT_LEASE,
            ms => Duration::from_millis(ms),
        }
    }

    /// Manager options derived from this configuration.
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            default_lease: self.expiry(),
            tries: self.tries,
            drift_factor: self.drift_factor,
            ..LockOptions::default()
        }
    }
}
