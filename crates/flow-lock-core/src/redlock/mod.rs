//! RedLock algorithm over independent store instances.
//!
//! Algorithm: https://redis.io/topics/distlock

pub mod acquire;
pub mod helper;
pub mod release;
pub mod timeouts;

pub use helper::RedLockHelper;
pub use timeouts::RedLockTimeouts;
