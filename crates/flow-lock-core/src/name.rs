//! Resource names used as store keys.

use std::fmt;

use uuid::Uuid;

use crate::error::{LockError, LockResult};

/// Key prefix for flow locks.
pub const FLOW_LOCK_PREFIX: &str = "flow:lock:";

/// Store key identifying a contended resource.
///
/// Always non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceName(String);

impl ResourceName {
    /// Validates and wraps an arbitrary resource name.
    pub fn new(name: impl Into<String>) -> LockResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LockError::InvalidName(
                "resource name must not be empty".to_string(),
            ));
        }
        Ok(Self(name))
    }

    /// The lock key for a flow: `flow:lock:<id>`.
    pub fn for_flow(flow_id: Uuid) -> Self {
        Self(format!("{FLOW_LOCK_PREFIX}{flow_id}"))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ResourceName {
    type Error = LockError;

    fn try_from(name: &str) -> LockResult<Self> {
        Self::new(name)
    }
}

impl TryFrom<String> for ResourceName {
    type Error = LockError;

    fn try_from(name: String) -> LockResult<Self> {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_name_format() {
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(
            ResourceName::for_flow(id).as_str(),
            "flow:lock:67e55044-10b1-426f-9247-bb680e5fe0c8"
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(ResourceName::new(""), Err(LockError::InvalidName(_))));
        assert!(matches!(ResourceName::new("   "), Err(LockError::InvalidName(_))));
    }

    #[test]
    fn test_names_passthrough() {
        let name = ResourceName::try_from("reports:nightly").unwrap();
        assert_eq!(name.to_string(), "reports:nightly");
    }
}
