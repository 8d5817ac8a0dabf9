//! Change-set construction
//!
//! Expands a validated mutation graph into ledger Changes:
//! - a node with a merge directive becomes a `merge`
//! - a blank node becomes a `create`, or an `update` when its natural key
//!   already belongs to a stored entity
//! - a concrete node becomes an `update`, unless it would change nothing
//!
//! The graph must already have passed [`catalog_core::validate`].

#![allow(clippy::result_large_err)]

use std::time::Instant;

use catalog_core::model::{
    ChangeKind, ChangePayload, ChangeSetId, Entity, EntityId, GraphNode, MutationGraph, NewChange,
    NodeId, SchemaRegistry,
};
use catalog_core::{log_op_end, log_op_error, log_op_start};
use catalog_store::errors::{from_rusqlite, Result};
use catalog_store::{ChangeRepo, EntityRepo};
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};

use super::{initial_fields, type_spec};

/// Write a pending change-set for `graph`
///
/// Returns `None`, writing nothing, when no node would change the store.
///
/// # Errors
///
/// Store errors, or `SchemaViolation` for a node type the registry does not
/// declare.
pub fn build_change_set(
    conn: &mut Connection,
    registry: &SchemaRegistry,
    graph: &MutationGraph,
    submitter: &str,
) -> Result<Option<ChangeSetId>> {
    let start = Instant::now();
    log_op_start!("build_change_set", submitter = submitter, node_count = graph.len());

    let result = build_inner(conn, registry, graph, submitter);

    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(Some(id)) => {
            log_op_end!("build_change_set", duration_ms = duration_ms, change_set_id = id.0);
        }
        Ok(None) => {
            log_op_end!("build_change_set", duration_ms = duration_ms, change_count = 0);
        }
        Err(e) => {
            log_op_error!("build_change_set", e.clone(), duration_ms = duration_ms);
        }
    }
    result
}

fn build_inner(
    conn: &mut Connection,
    registry: &SchemaRegistry,
    graph: &MutationGraph,
    submitter: &str,
) -> Result<Option<ChangeSetId>> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(from_rusqlite)?;

    let mut planned = Vec::with_capacity(graph.len());
    for node in &graph.nodes {
        if let Some(change) = plan_node(&tx, registry, node)? {
            planned.push(change);
        }
    }
    if planned.is_empty() {
        return Ok(None);
    }

    let now = Utc::now().timestamp_millis();
    let change_set_id = ChangeRepo::create_change_set(&tx, submitter, registry.version(), now)?;
    for change in &planned {
        ChangeRepo::insert_change(&tx, change_set_id, change)?;
    }
    tx.commit().map_err(from_rusqlite)?;

    tracing::debug!(
        change_set_id = change_set_id.0,
        change_count = planned.len(),
        "Change-set written"
    );
    Ok(Some(change_set_id))
}

/// Change for one node, `None` when the node is a no-op
fn plan_node(
    conn: &Connection,
    registry: &SchemaRegistry,
    node: &GraphNode,
) -> Result<Option<NewChange>> {
    let spec = type_spec(registry, &node.node_type, "build_change_set")
        .map_err(|e| e.with_node_id(node.id.as_str()))?;
    let entity_type = registry
        .resolve_type(&node.node_type)
        .unwrap_or(node.node_type.as_str())
        .to_string();
    let payload = ChangePayload::from(node);

    if node.is_merge() {
        return Ok(Some(NewChange {
            node_id: node.id.clone(),
            kind: ChangeKind::Merge,
            target_type: entity_type,
            target_id: None,
            payload,
        }));
    }

    match &node.id {
        NodeId::Blank(_) => {
            let existing = match spec.natural_key_digest(&entity_type, &initial_fields(spec, &node.fields)) {
                Some(digest) => find_canonical_by_key(conn, &entity_type, &digest)?,
                None => None,
            };
            let kind = if let Some(id) = &existing {
                tracing::info!(
                    node_id = node.id.as_str(),
                    entity_type = entity_type.as_str(),
                    entity_id = id.as_str(),
                    "Blank node matches a stored entity by natural key"
                );
                ChangeKind::Update
            } else {
                ChangeKind::Create
            };
            Ok(Some(NewChange {
                node_id: node.id.clone(),
                kind,
                target_type: entity_type,
                target_id: existing,
                payload,
            }))
        }
        NodeId::Concrete(id) => {
            if let Some(current) = EntityRepo::resolve_canonical(conn, &entity_type, id)? {
                if is_noop(registry, node, &current) {
                    tracing::debug!(
                        node_id = node.id.as_str(),
                        entity_type = entity_type.as_str(),
                        "Skipping node that changes nothing"
                    );
                    return Ok(None);
                }
            }
            Ok(Some(NewChange {
                node_id: node.id.clone(),
                kind: ChangeKind::Update,
                target_type: entity_type,
                target_id: Some(id.clone()),
                payload,
            }))
        }
    }
}

fn find_canonical_by_key(
    conn: &Connection,
    entity_type: &str,
    digest: &str,
) -> Result<Option<EntityId>> {
    let Some(holder) = EntityRepo::find_by_natural_key(conn, entity_type, digest)? else {
        return Ok(None);
    };
    Ok(EntityRepo::resolve_canonical(conn, entity_type, &holder)?.map(|e| e.id))
}

/// A concrete node is a no-op when it carries no provenance and every field
/// it sets is a scalar already holding that value
fn is_noop(registry: &SchemaRegistry, node: &GraphNode, current: &Entity) -> bool {
    if node.extra_bag().is_some() {
        return false;
    }
    let Some(fields) = registry.fields_for(&node.node_type) else {
        return false;
    };
    node.fields.iter().all(|(name, value)| match fields.get(name) {
        Some(spec) if !spec.kind.is_relation() => {
            current.fields.get(name).unwrap_or(&serde_json::Value::Null) == value
        }
        _ => false,
    })
}
