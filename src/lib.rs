//! Distributed flow locks over independent key/value store instances.
//!
//! A flow lock gives one worker at a time the right to process a flow, across
//! processes and machines that share nothing but a set of store servers. The
//! lock is a lease: it is written under a unique token on a majority of the
//! servers and expires on its own, so a crashed holder never blocks a flow for
//! longer than its lease.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use flow_lock::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let locker = RedisFlowLocker::builder()
//!         .urls(&["redis://a:6379", "redis://b:6379", "redis://c:6379"])
//!         .expiry(Duration::from_secs(15))
//!         .build()
//!         .await?;
//!
//!     let ctx = LockContext::background().with_timeout(Duration::from_secs(5));
//!     let handle = locker.lock(&ctx, uuid::Uuid::new_v4()).await?;
//!
//!     // Only this worker processes the flow until release or expiry
//!
//!     handle.release(&ctx).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Failure Semantics
//!
//! - `AcquisitionFailed`: the caller does not hold the lock; retry later.
//! - `ReleaseUncertain`: release could not be confirmed on a quorum. Never
//!   read this as "still locked"; the lease expires on its own.
//! - `PreconditionFailed`: the context was already done; nothing was written.
//!
//! # Crate Organization
//!
//! This is a meta-crate that re-exports types from:
//! - `flow-lock-core`: context, errors, store trait, quorum manager, in-memory store
//! - `flow-lock-redis`: Redis store and locker
//!
//! For fine-grained control, you can depend on individual crates instead.

// Re-export core types and traits
pub use flow_lock_core::*;

// Re-export redis backend
pub use flow_lock_redis::*;
