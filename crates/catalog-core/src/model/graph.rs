//! Mutation graph wire model
//!
//! A graph is a flat list of typed nodes. Field values are kept as raw JSON
//! until the validator (or the engine, after validation) classifies them
//! against the schema, so that every shape problem can be reported instead
//! of failing deserialization on the first one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{CatalogError, Result};
use crate::model::ids::NodeId;

/// A typed pointer at another node or at a stored entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "@id")]
    pub id: NodeId,
    #[serde(rename = "@type")]
    pub ref_type: String,
}

impl Reference {
    pub fn new(id: NodeId, ref_type: impl Into<String>) -> Self {
        Self {
            id,
            ref_type: ref_type.into(),
        }
    }

    /// Read a reference object: exactly `@id` and `@type`, both strings
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.len() != 2 {
            return None;
        }
        let id = obj.get("@id")?.as_str()?;
        let ref_type = obj.get("@type")?.as_str()?;
        let id = NodeId::try_from(id.to_string()).ok()?;
        Some(Self::new(id, ref_type))
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "@id": self.id.as_str(), "@type": self.ref_type })
    }
}

/// Redirect of duplicate entities onto a canonical one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDirective {
    pub from: Vec<Reference>,
    pub into: Reference,
}

/// One node of a mutation graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(rename = "@id")]
    pub id: NodeId,
    #[serde(rename = "@type")]
    pub node_type: String,
    /// Free-form provenance data from the submitter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    #[serde(rename = "@merge", default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeDirective>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl GraphNode {
    pub fn new(id: NodeId, node_type: impl Into<String>) -> Self {
        Self {
            id,
            node_type: node_type.into(),
            extra: None,
            merge: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: serde_json::Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn with_merge(mut self, from: Vec<Reference>, into: Reference) -> Self {
        self.merge = Some(MergeDirective { from, into });
        self
    }

    pub fn is_merge(&self) -> bool {
        self.merge.is_some()
    }

    /// Provenance bag, if it carries anything
    pub fn extra_bag(&self) -> Option<&serde_json::Value> {
        match &self.extra {
            Some(serde_json::Value::Object(m)) if m.is_empty() => None,
            Some(serde_json::Value::Null) | None => None,
            Some(v) => Some(v),
        }
    }

    /// Every reference the node carries, in fields and in its merge directive
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        for value in self.fields.values() {
            match value {
                serde_json::Value::Array(items) => {
                    out.extend(items.iter().filter_map(Reference::from_value))
                }
                other => out.extend(Reference::from_value(other)),
            }
        }
        if let Some(merge) = &self.merge {
            out.extend(merge.from.iter().cloned());
            out.push(merge.into.clone());
        }
        out
    }
}

/// A submitted batch of candidate mutations
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MutationGraph {
    #[serde(rename = "@graph")]
    pub nodes: Vec<GraphNode>,
}

impl MutationGraph {
    pub fn new(nodes: Vec<GraphNode>) -> Self {
        Self { nodes }
    }

    /// Parse a graph document
    ///
    /// # Errors
    ///
    /// `Serialization` when the document is not a graph of `@id`/`@type`
    /// nodes. Field-level problems are left to the validator.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CatalogError::Serialization {
            message: format!("invalid mutation graph: {}", e),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
