//! Redis backend for flow locks.
//!
//! Each configured server is an independent store instance; a lock is held
//! once a majority of them accepted the same token.

pub mod config;
pub mod locker;
pub mod store;

pub use config::RedisLockerConfig;
pub use locker::{RedisFlowLocker, RedisFlowLockerBuilder, RedisReleaseHandle};
pub use store::RedisStore;
