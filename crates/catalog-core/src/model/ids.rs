//! Identifiers
//!
//! A graph node is named either by a blank identifier (scoped to one graph,
//! always prefixed `_:`) or by the persistent identifier of a stored entity.
//! [`NodeId`] is the tagged union of the two; everything downstream
//! dispatches on the tag instead of re-inspecting the string.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix marking a blank identifier
pub const BLANK_PREFIX: &str = "_:";

/// Graph-scoped identifier of a node that does not exist yet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlankId(String);

impl BlankId {
    /// Parse a blank identifier, prefix included
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() > BLANK_PREFIX.len() && s.starts_with(BLANK_PREFIX) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlankId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistent identifier of a stored entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Mint a new identifier (UUIDv7)
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a graph node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodeId {
    Blank(BlankId),
    Concrete(EntityId),
}

impl NodeId {
    pub fn is_blank(&self) -> bool {
        matches!(self, NodeId::Blank(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeId::Blank(b) => b.as_str(),
            NodeId::Concrete(e) => e.as_str(),
        }
    }
}

impl TryFrom<String> for NodeId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.is_empty() {
            return Err("node identifier must not be empty".to_string());
        }
        if s.starts_with(BLANK_PREFIX) {
            return BlankId::parse(&s)
                .map(NodeId::Blank)
                .ok_or_else(|| format!("blank identifier '{}' has no name", s));
        }
        Ok(NodeId::Concrete(EntityId(s)))
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        match id {
            NodeId::Blank(b) => b.0,
            NodeId::Concrete(e) => e.0,
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Row id of a change-set in the change store
    ChangeSetId
);
row_id!(
    /// Row id of a change in the change store
    ChangeId
);
row_id!(
    /// Row id of an immutable entity version
    VersionId
);

/// A resolved, typed pointer at a stored entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "@type")]
    pub entity_type: String,
    #[serde(rename = "@id")]
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_dispatches_on_prefix() {
        let blank = NodeId::try_from("_:1".to_string()).unwrap();
        assert!(blank.is_blank());
        let concrete = NodeId::try_from("0190-abc".to_string()).unwrap();
        assert!(!concrete.is_blank());
    }

    #[test]
    fn test_bare_prefix_is_rejected() {
        assert!(NodeId::try_from("_:".to_string()).is_err());
        assert!(NodeId::try_from(String::new()).is_err());
    }

    #[test]
    fn test_node_id_serializes_as_plain_string() {
        let id: NodeId = serde_json::from_str("\"_:w1\"").unwrap();
        assert_eq!(id.as_str(), "_:w1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"_:w1\"");
    }

    #[test]
    fn test_generated_entity_ids_are_unique() {
        assert_ne!(EntityId::generate(), EntityId::generate());
    }
}
