use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{CatalogError, Result};
use crate::model::ids::{ChangeId, EntityId, EntityRef, VersionId};

/// Current value of a relation field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationValue {
    One(EntityRef),
    Many(Vec<EntityRef>),
}

impl RelationValue {
    pub fn targets(&self) -> &[EntityRef] {
        match self {
            RelationValue::One(r) => std::slice::from_ref(r),
            RelationValue::Many(rs) => rs,
        }
    }
}

/// Current state of a catalog entity
///
/// Entities are never deleted. A merged-away entity keeps its row and its
/// history and points at its canonical replacement through `same_as`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub entity_type: String,
    pub id: EntityId,
    /// Scalar field values
    pub fields: BTreeMap<String, serde_json::Value>,
    pub relations: BTreeMap<String, RelationValue>,
    /// Provenance bags keyed by submitter
    pub extra: BTreeMap<String, serde_json::Value>,
    pub same_as: Option<EntityId>,
    pub same_as_version: Option<VersionId>,
    /// Current version; `None` only while a create is mid-application
    pub version_id: Option<VersionId>,
    pub version_number: u32,
    /// Change that last touched this entity
    pub change_id: Option<ChangeId>,
    /// Submitters that have contributed to this entity
    pub sources: Vec<String>,
    pub created_at: i64,
    pub modified_at: i64,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, id: EntityId, now_ms: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
            extra: BTreeMap::new(),
            same_as: None,
            same_as_version: None,
            version_id: None,
            version_number: 0,
            change_id: None,
            sources: Vec::new(),
            created_at: now_ms,
            modified_at: now_ms,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.id.clone())
    }

    /// Record `bag` as `submitter`'s provenance data
    pub fn record_extra(&mut self, submitter: &str, bag: serde_json::Value) {
        self.extra.insert(submitter.to_string(), bag);
    }

    /// Serialized state written to a version row
    ///
    /// # Errors
    ///
    /// `Serialization` if a relation cannot be encoded.
    pub fn snapshot(&self) -> Result<String> {
        let relations = serde_json::to_value(&self.relations).map_err(|e| {
            CatalogError::Serialization {
                message: format!("cannot encode relations of {}: {}", self.id, e),
            }
        })?;
        Ok(serde_json::json!({
            "@type": self.entity_type,
            "@id": self.id.as_str(),
            "fields": self.fields,
            "relations": relations,
            "extra": self.extra,
            "same_as": self.same_as.as_ref().map(EntityId::as_str),
        })
        .to_string())
    }
}

/// Immutable snapshot of an entity at one point of its history
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    pub version_id: VersionId,
    pub entity_type: String,
    pub entity_id: EntityId,
    /// 1-based position in the entity's history
    pub version_number: u32,
    /// Snapshot exactly as written
    pub state: String,
    pub change_id: Option<ChangeId>,
    pub created_at: i64,
}

impl Version {
    /// # Errors
    ///
    /// `Serialization` if the stored snapshot is not JSON.
    pub fn state_value(&self) -> Result<serde_json::Value> {
        serde_json::from_str(&self.state).map_err(|e| CatalogError::Serialization {
            message: format!("corrupt version {}: {}", self.version_id, e),
        })
    }
}
