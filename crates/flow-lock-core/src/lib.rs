//! Core types and the quorum algorithm for flow locks.
//!
//! A lock is a lease written under the same fencing token on a majority of
//! independent store instances. Leases expire on their own, so a crashed
//! holder never blocks a resource for longer than its lease.

pub mod context;
pub mod error;
pub mod handle;
pub mod manager;
pub mod memory;
pub mod name;
pub mod prelude;
pub mod redlock;
pub mod token;
pub mod traits;

pub use error::{LockError, LockResult};
pub use prelude::*;
