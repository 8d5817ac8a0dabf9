//! Command orchestration layer
//!
//! Each command coordinates the pure kernel in `catalog-core` with the
//! repositories in `catalog-store` and owns the transaction it runs in.

pub mod apply;
pub mod build;
pub mod merge;
pub mod submit;

use std::collections::BTreeMap;

use catalog_core::errors::{CatalogError, ExError};
use catalog_core::model::{SchemaRegistry, TypeSpec};
use catalog_store::errors::Result;

/// Declaration of `entity_type`, or an unknown-type error for `op`
pub(crate) fn type_spec<'r>(
    registry: &'r SchemaRegistry,
    entity_type: &str,
    op: &str,
) -> Result<&'r TypeSpec> {
    registry.type_spec(entity_type).ok_or_else(|| {
        ExError::from(CatalogError::UnknownType {
            type_name: entity_type.to_string(),
        })
        .with_op(op)
    })
}

/// Scalar state of a new entity: submitted scalar values plus defaults
pub(crate) fn initial_fields(
    spec: &TypeSpec,
    submitted: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, serde_json::Value> {
    let mut fields = BTreeMap::new();
    for (name, field) in &spec.fields {
        if field.kind.is_relation() {
            continue;
        }
        if let Some(value) = submitted.get(name) {
            fields.insert(name.clone(), value.clone());
        } else if let Some(default) = &field.default {
            fields.insert(name.clone(), default.clone());
        }
    }
    fields
}
