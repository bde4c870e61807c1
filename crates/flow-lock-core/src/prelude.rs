//! Convenience prelude for flow lock types.

pub use crate::context::{CancelHandle, LockContext};
pub use crate::error::{ContextError, InstanceFailure, LockError, LockResult, StoreError};
pub use crate::handle::ReleaseHandle;
pub use crate::manager::{LockManager, LockManagerBuilder, LockOptions};
pub use crate::memory::MemoryStore;
pub use crate::name::ResourceName;
pub use crate::token::LockToken;
pub use crate::traits::{DeleteOutcome, FlowLocker, LockHandle, LockStore};
