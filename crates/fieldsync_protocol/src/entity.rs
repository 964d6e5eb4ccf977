//! Entity identifiers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the entity that owns a mutation queue.
///
/// Typically the backend identifier of a job (`"J1"`, `"JOB-2024-0113"`).
/// Identifiers are opaque; the only constraint is that they are not blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity id, rejecting blank input.
    pub fn new(id: impl Into<String>) -> ProtocolResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ProtocolError::InvalidEntityId(id));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityId {
    type Error = ProtocolError;

    fn try_from(id: String) -> ProtocolResult<Self> {
        Self::new(id)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl std::str::FromStr for EntityId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_ids() {
        assert!(EntityId::new("").is_err());
        assert!(EntityId::new("   ").is_err());
        assert_eq!(EntityId::new("J1").unwrap().as_str(), "J1");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id: EntityId = "JOB-7".parse().unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"JOB-7\"");
        assert_eq!(id.to_string(), "JOB-7");
        let back: EntityId = serde_json::from_str("\"JOB-7\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn deserializing_blank_id_fails() {
        assert!(serde_json::from_str::<EntityId>("\"  \"").is_err());
        assert!(serde_json::from_str::<EntityId>("\"\"").is_err());
    }
}
