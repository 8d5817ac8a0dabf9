//! Graph validator
//!
//! Checks a mutation graph against the schema registry and against itself
//! before anything is written. Validation is a pure function of
//! `(graph, registry)`: it never touches a store, so concrete references
//! are only checked for shape and relation target here and for existence
//! later, during resolution.
//!
//! Every violation is collected; the validator never stops at the first.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use crate::errors::{ExError, ExErrorKind};
use crate::model::field::FieldValue;
use crate::model::graph::{GraphNode, MergeDirective, MutationGraph};
use crate::model::schema::{SchemaRegistry, TypeSpec};
use crate::rules::reference_closure::find_unresolved_blanks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    EmptyGraph,
    UnknownType,
    UnknownField,
    MissingField,
    KindMismatch,
    IllegalRelationTarget,
    UnresolvedReference,
    InvalidMerge,
    DuplicateNode,
}

/// One structural problem with a submitted graph
///
/// For `UnresolvedReference` the node fields name the missing reference
/// target rather than the node holding the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl Violation {
    fn on_node(kind: ViolationKind, node: &GraphNode, message: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: Some(node.id.to_string()),
            node_type: Some(node.node_type.clone()),
            field: None,
            message: message.into(),
        }
    }

    fn on_field(
        kind: ViolationKind,
        node: &GraphNode,
        field: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: Some(field.to_string()),
            ..Self::on_node(kind, node, message)
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let (Some(t), Some(id)) = (&self.node_type, &self.node_id) {
            write!(f, " {} {}", t, id)?;
        }
        if let Some(field) = &self.field {
            write!(f, " .{}", field)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// The full list of violations of a rejected graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mutation graph has {} violation(s)", .0.len())]
pub struct ValidationErrors(pub Vec<Violation>);

impl ValidationErrors {
    pub fn violations(&self) -> &[Violation] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn of_kind(&self, kind: ViolationKind) -> impl Iterator<Item = &Violation> {
        self.0.iter().filter(move |v| v.kind == kind)
    }

    /// Serialized violation list, as stored on a rejected change-set
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.kind().code(),
            "violations": self.0,
        })
    }

    /// `UnresolvedReference` when that is all that is wrong, else `SchemaViolation`
    pub fn kind(&self) -> ExErrorKind {
        if !self.0.is_empty()
            && self
                .0
                .iter()
                .all(|v| v.kind == ViolationKind::UnresolvedReference)
        {
            ExErrorKind::UnresolvedReference
        } else {
            ExErrorKind::SchemaViolation
        }
    }
}

impl From<ValidationErrors> for ExError {
    fn from(errs: ValidationErrors) -> Self {
        ExError::new(errs.kind()).with_message(errs.to_string())
    }
}

/// Validate `graph` against `registry`
///
/// # Errors
///
/// Every violation found, with unresolved blank references reported last
/// and sorted by identifier.
pub fn validate(graph: &MutationGraph, registry: &SchemaRegistry) -> Result<(), ValidationErrors> {
    let mut violations = Vec::new();

    if graph.is_empty() {
        violations.push(Violation {
            kind: ViolationKind::EmptyGraph,
            node_id: None,
            node_type: None,
            field: None,
            message: "graph contains no nodes".to_string(),
        });
        return Err(ValidationErrors(violations));
    }

    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert((node.id.as_str(), node.node_type.to_lowercase())) {
            violations.push(Violation::on_node(
                ViolationKind::DuplicateNode,
                node,
                "node appears more than once",
            ));
        }

        let Some(type_spec) = registry.type_spec(&node.node_type) else {
            violations.push(Violation::on_node(
                ViolationKind::UnknownType,
                node,
                format!("type '{}' is not in schema {}", node.node_type, registry.version()),
            ));
            continue;
        };

        match &node.merge {
            Some(merge) => check_merge(node, merge, registry, &mut violations),
            None => check_fields(node, type_spec, &mut violations),
        }
    }

    for missing in find_unresolved_blanks(graph) {
        violations.push(Violation {
            kind: ViolationKind::UnresolvedReference,
            node_id: Some(missing.id.to_string()),
            node_type: Some(missing.ref_type.clone()),
            field: None,
            message: format!(
                "blank reference {} of type {} is not defined in the graph",
                missing.id, missing.ref_type
            ),
        });
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(violations))
    }
}

fn check_fields(node: &GraphNode, type_spec: &TypeSpec, violations: &mut Vec<Violation>) {
    if let Some(extra) = &node.extra {
        if !(extra.is_object() || extra.is_null()) {
            violations.push(Violation::on_field(
                ViolationKind::KindMismatch,
                node,
                "extra",
                "extra must be an object",
            ));
        }
    }

    for (name, value) in &node.fields {
        let Some(spec) = type_spec.fields.get(name) else {
            violations.push(Violation::on_field(
                ViolationKind::UnknownField,
                node,
                name,
                "field is not declared for this type",
            ));
            continue;
        };
        match FieldValue::from_json(spec, value) {
            Err(reason) => violations.push(Violation::on_field(
                ViolationKind::KindMismatch,
                node,
                name,
                reason,
            )),
            Ok(field_value) => {
                for reference in field_value.references() {
                    if !spec.accepts_target(&reference.ref_type) {
                        violations.push(Violation::on_field(
                            ViolationKind::IllegalRelationTarget,
                            node,
                            name,
                            format!(
                                "{} is not a legal target (expected one of {:?})",
                                reference.ref_type, spec.relation_targets
                            ),
                        ));
                    }
                }
            }
        }
    }

    for (name, spec) in &type_spec.fields {
        if spec.is_mandatory() && !node.fields.contains_key(name) {
            violations.push(Violation::on_field(
                ViolationKind::MissingField,
                node,
                name,
                "required field is missing",
            ));
        }
    }
}

fn check_merge(
    node: &GraphNode,
    merge: &MergeDirective,
    registry: &SchemaRegistry,
    violations: &mut Vec<Violation>,
) {
    let mut invalid = |message: String| {
        violations.push(Violation::on_node(ViolationKind::InvalidMerge, node, message))
    };

    if !node.fields.is_empty() || node.extra_bag().is_some() {
        invalid("a merge node carries no fields or extra".to_string());
    }
    if merge.from.is_empty() {
        invalid("merge has no 'from' entities".to_string());
    }

    let node_type = registry.resolve_type(&node.node_type);
    for reference in merge.from.iter().chain(std::iter::once(&merge.into)) {
        if registry.resolve_type(&reference.ref_type) != node_type {
            invalid(format!(
                "{} {} is not a {}",
                reference.ref_type, reference.id, node.node_type
            ));
        }
    }

    if merge.from.iter().any(|r| r.id == merge.into.id) {
        invalid(format!("{} is merged into itself", merge.into.id));
    }
}
