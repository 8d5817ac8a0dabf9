//! Change ledger model
//!
//! A change-set groups the Changes produced from one mutation graph. Changes
//! are immutable once written with one exception: a create that collides
//! with an existing entity is converted to an update, exactly once, through
//! [`Change::convert_to_update`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{CatalogError, Result};
use crate::model::graph::{GraphNode, MergeDirective};
use crate::model::ids::{ChangeId, ChangeSetId, EntityId, NodeId, VersionId};

/// Lifecycle status of a change-set
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSetStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ChangeSetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSetStatus::Pending => "pending",
            ChangeSetStatus::Accepted => "accepted",
            ChangeSetStatus::Rejected => "rejected",
        }
    }

    /// # Errors
    ///
    /// `Serialization` for an unknown status string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ChangeSetStatus::Pending),
            "accepted" => Ok(ChangeSetStatus::Accepted),
            "rejected" => Ok(ChangeSetStatus::Rejected),
            other => Err(CatalogError::Serialization {
                message: format!("unknown change-set status '{}'", other),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChangeSetStatus::Pending)
    }

    /// Check a status transition
    ///
    /// # Errors
    ///
    /// `InvariantViolation` unless moving from `Pending` to a terminal state.
    pub fn transition(self, to: ChangeSetStatus) -> Result<ChangeSetStatus> {
        match (self, to) {
            (ChangeSetStatus::Pending, ChangeSetStatus::Accepted)
            | (ChangeSetStatus::Pending, ChangeSetStatus::Rejected) => Ok(to),
            (from, to) => Err(CatalogError::InvariantViolation {
                reason: format!(
                    "change-set cannot move from {} to {}",
                    from.as_str(),
                    to.as_str()
                ),
            }),
        }
    }
}

impl std::fmt::Display for ChangeSetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one submitted graph
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub id: ChangeSetId,
    pub submitter: String,
    pub status: ChangeSetStatus,
    /// Version of the schema registry the graph was checked against
    pub schema_version: String,
    pub submitted_at: i64,
    pub finalized_at: Option<i64>,
    /// Originating error or violation list of a rejected change-set
    pub error: Option<serde_json::Value>,
}

/// Operation decided for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Merge,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Merge => "merge",
        }
    }

    /// # Errors
    ///
    /// `Serialization` for an unknown kind string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(ChangeKind::Create),
            "update" => Ok(ChangeKind::Update),
            "merge" => Ok(ChangeKind::Merge),
            other => Err(CatalogError::Serialization {
                message: format!("unknown change kind '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a Change will write, as submitted
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangePayload {
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeDirective>,
}

impl From<&GraphNode> for ChangePayload {
    fn from(node: &GraphNode) -> Self {
        Self {
            fields: node.fields.clone(),
            extra: node.extra_bag().cloned(),
            merge: node.merge.clone(),
        }
    }
}

/// A Change ready to be written to the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
    pub node_id: NodeId,
    pub kind: ChangeKind,
    /// Declared spelling of the node's type
    pub target_type: String,
    pub target_id: Option<EntityId>,
    pub payload: ChangePayload,
}

/// One node's mutation, as recorded in the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub id: ChangeId,
    pub change_set_id: ChangeSetId,
    /// Node identifier, scoped to the change-set
    pub node_id: NodeId,
    pub kind: ChangeKind,
    pub target_type: String,
    /// Absent for a create until it is applied, and for merges
    pub target_id: Option<EntityId>,
    pub target_version_id: Option<VersionId>,
    pub payload: ChangePayload,
    /// Set once a create has been converted to an update
    pub disambiguated: bool,
}

impl Change {
    /// Turn a colliding create into an update against `target`
    ///
    /// # Errors
    ///
    /// `InvariantViolation` if the Change is not a create, or has already
    /// been converted once.
    pub fn convert_to_update(&mut self, target: EntityId) -> Result<()> {
        if self.disambiguated {
            return Err(CatalogError::InvariantViolation {
                reason: format!("change {} was already disambiguated", self.id),
            });
        }
        if self.kind != ChangeKind::Create {
            return Err(CatalogError::InvariantViolation {
                reason: format!(
                    "change {} is a {}, only a create can become an update",
                    self.id, self.kind
                ),
            });
        }
        self.kind = ChangeKind::Update;
        self.target_id = Some(target);
        self.disambiguated = true;
        Ok(())
    }
}
