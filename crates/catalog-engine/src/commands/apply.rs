//! Change-set application
//!
//! A pending change-set is applied inside one `IMMEDIATE` transaction:
//!
//! 1. **Materialize**: every create inserts its entity with its own scalar
//!    fields, every update locates its canonical target. Blank node ids are
//!    recorded in the change-set's [`BlankScope`].
//! 2. **Relate**: with every node's identity known, reference fields are
//!    resolved and written, and one version is written per Change.
//! 3. **Merge**: merge Changes redirect duplicates onto their canonical
//!    entity.
//!
//! Any failure rolls the whole transaction back; the change-set is then
//! marked rejected in a separate write carrying the error.

#![allow(clippy::result_large_err)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use catalog_core::errors::{CatalogError, ExError, ExErrorKind};
use catalog_core::model::{
    Change, ChangeId, ChangeKind, ChangeSet, ChangeSetId, ChangeSetStatus, Entity, EntityId,
    EntityRef, FieldSpec, FieldValue, NodeId, Reference, RelationValue, SchemaRegistry, Version,
    VersionId,
};
use catalog_core::{log_op_end, log_op_error, log_op_start};
use catalog_store::errors::{from_rusqlite, Result};
use catalog_store::{ChangeRepo, EntityRepo};
use chrono::Utc;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;

use super::merge::apply_merge;
use super::{initial_fields, type_spec};
use crate::resolver::{BlankScope, Resolver};

/// Attempts at writing a rejection while the store is locked
pub const REJECT_ATTEMPTS: u32 = 8;
/// Step of the linear backoff between rejection attempts
pub const REJECT_BACKOFF_MS: u64 = 25;

/// One entity written by an accepted change-set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedEntity {
    pub change_id: ChangeId,
    pub node_id: NodeId,
    /// Final kind of the Change, after any disambiguation
    pub kind: ChangeKind,
    /// The written entity; for a merge, the canonical `into` entity
    pub entity: EntityRef,
    pub version_id: Option<VersionId>,
}

/// State shared by the phases of one application
struct ApplyContext<'a> {
    registry: &'a SchemaRegistry,
    submitter: &'a str,
    now: i64,
    scope: BlankScope,
    /// Working copy of every entity touched so far, by id
    entities: HashMap<EntityId, Entity>,
}

/// Apply a pending change-set
///
/// # Errors
///
/// - `InvariantViolation` if the change-set is not pending; it is left as is
/// - `NotFound` for an unknown change-set
/// - the error of the first Change that fails, tagged with its change id;
///   the change-set is marked rejected and nothing it wrote survives
pub fn apply_change_set(
    conn: &mut Connection,
    registry: &SchemaRegistry,
    change_set_id: ChangeSetId,
) -> Result<Vec<AppliedEntity>> {
    let start = Instant::now();
    log_op_start!("apply_change_set", change_set_id = change_set_id.0);

    let result = apply_inner(conn, registry, change_set_id);

    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(applied) => {
            log_op_end!(
                "apply_change_set",
                duration_ms = duration_ms,
                change_set_id = change_set_id.0,
                change_count = applied.len()
            );
        }
        Err(e) => {
            log_op_error!(
                "apply_change_set",
                e.clone(),
                duration_ms = duration_ms,
                change_set_id = change_set_id.0,
                change_id = e.change_id()
            );
        }
    }
    result
}

fn apply_inner(
    conn: &mut Connection,
    registry: &SchemaRegistry,
    change_set_id: ChangeSetId,
) -> Result<Vec<AppliedEntity>> {
    let change_set = ChangeRepo::get_change_set(conn, change_set_id)?.ok_or_else(|| {
        ExError::new(ExErrorKind::NotFound)
            .with_op("apply_change_set")
            .with_change_set_id(change_set_id.0)
            .with_message("change-set does not exist")
    })?;
    if change_set.status != ChangeSetStatus::Pending {
        return Err(ExError::new(ExErrorKind::InvariantViolation)
            .with_op("apply_change_set")
            .with_change_set_id(change_set_id.0)
            .with_message(format!(
                "change-set is {}, only a pending change-set can be applied",
                change_set.status
            )));
    }

    match apply_in_transaction(conn, registry, &change_set) {
        Ok(applied) => Ok(applied),
        Err(err) => {
            let err = err.with_change_set_id(change_set_id.0);
            reject(conn, change_set_id, &err);
            Err(err)
        }
    }
}

/// Record the rejection after the failed transaction has rolled back
fn reject(conn: &Connection, change_set_id: ChangeSetId, err: &ExError) {
    if let Err(mark_err) = record_rejection(conn, change_set_id, &err.to_json()) {
        tracing::error!(
            change_set_id = change_set_id.0,
            error = %mark_err,
            "Could not record change-set rejection, change-set left pending"
        );
    }
}

/// Mark a change-set rejected, retrying while another writer holds the store
///
/// A change-set that already reached a terminal status is left as is.
///
/// # Errors
///
/// The last store error once [`REJECT_ATTEMPTS`] are used up, or any
/// non-retryable store error.
pub(crate) fn record_rejection(
    conn: &Connection,
    change_set_id: ChangeSetId,
    error: &serde_json::Value,
) -> Result<()> {
    let mut attempt: u32 = 1;
    loop {
        let outcome = mark_rejected(conn, change_set_id, error);
        match outcome {
            Err(e) if e.is_retryable() && attempt < REJECT_ATTEMPTS => {
                tracing::debug!(
                    change_set_id = change_set_id.0,
                    attempt = attempt,
                    "Store busy, retrying rejection write"
                );
                std::thread::sleep(Duration::from_millis(
                    REJECT_BACKOFF_MS.saturating_mul(u64::from(attempt)),
                ));
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn mark_rejected(
    conn: &Connection,
    change_set_id: ChangeSetId,
    error: &serde_json::Value,
) -> Result<()> {
    match ChangeRepo::get_change_set(conn, change_set_id)? {
        Some(cs) if cs.status == ChangeSetStatus::Pending => ChangeRepo::finalize(
            conn,
            change_set_id,
            ChangeSetStatus::Rejected,
            Some(error),
            Utc::now().timestamp_millis(),
        ),
        _ => Ok(()),
    }
}

fn apply_in_transaction(
    conn: &mut Connection,
    registry: &SchemaRegistry,
    change_set: &ChangeSet,
) -> Result<Vec<AppliedEntity>> {
    let mut tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(from_rusqlite)?;
    let mut changes = ChangeRepo::list_changes(&tx, change_set.id)?;
    let mut ctx = ApplyContext {
        registry,
        submitter: &change_set.submitter,
        now: Utc::now().timestamp_millis(),
        scope: BlankScope::new(),
        entities: HashMap::new(),
    };

    // Phase 1: every node gets an identity
    let mut targets: Vec<Option<EntityId>> = Vec::with_capacity(changes.len());
    for change in changes.iter_mut() {
        let change_id = change.id.0;
        let target = match change.kind {
            ChangeKind::Merge => None,
            ChangeKind::Create => Some(materialize(&mut tx, &mut ctx, change)),
            ChangeKind::Update => Some(locate(&tx, &mut ctx, change)),
        }
        .transpose()
        .map_err(|e| e.with_change_id(change_id))?;

        if let (Some(id), NodeId::Blank(blank)) = (&target, &change.node_id) {
            ctx.scope.insert(blank.clone(), &change.target_type, id.clone());
        }
        targets.push(target);
    }

    // Phase 2: relations and versions
    let mut applied = Vec::with_capacity(changes.len());
    for (change, target) in changes.iter().zip(&targets) {
        let Some(id) = target else {
            continue;
        };
        let version = relate_and_version(&tx, &mut ctx, change, id).map_err(|e| {
            tracing::error!(
                change_set_id = change_set.id.0,
                change_id = change.id.0,
                node_id = change.node_id.as_str(),
                submitter = change_set.submitter.as_str(),
                error = %e,
                "Change failed"
            );
            e.with_change_id(change.id.0)
        })?;
        applied.push(AppliedEntity {
            change_id: change.id,
            node_id: change.node_id.clone(),
            kind: change.kind,
            entity: EntityRef::new(version.entity_type, version.entity_id),
            version_id: Some(version.version_id),
        });
    }
    EntityRepo::pin_unversioned_relations(&tx)?;

    // Phase 3: merges
    let resolver = Resolver::new(&tx, registry, &ctx.scope);
    for change in changes.iter().filter(|c| c.kind == ChangeKind::Merge) {
        let outcome =
            apply_merge(&tx, registry, &resolver, change).map_err(|e| e.with_change_id(change.id.0))?;
        applied.push(AppliedEntity {
            change_id: change.id,
            node_id: change.node_id.clone(),
            kind: ChangeKind::Merge,
            entity: outcome.into,
            version_id: outcome.into_version,
        });
    }

    ChangeRepo::finalize(&tx, change_set.id, ChangeSetStatus::Accepted, None, ctx.now)?;
    tx.commit().map_err(from_rusqlite)?;
    Ok(applied)
}

/// Insert a created entity, falling back to an update on a natural key
/// collision
///
/// The fallback converts the Change at most once; a second collision for
/// the same Change fails the change-set.
fn materialize(
    tx: &mut Transaction<'_>,
    ctx: &mut ApplyContext<'_>,
    change: &mut Change,
) -> Result<EntityId> {
    let spec = type_spec(ctx.registry, &change.target_type, "apply_create")?;
    let id = EntityId::generate();
    let mut entity = Entity::new(change.target_type.clone(), id.clone(), ctx.now);
    entity.fields = initial_fields(spec, &change.payload.fields);
    let digest = spec.natural_key_digest(&change.target_type, &entity.fields);

    let savepoint = tx.savepoint().map_err(from_rusqlite)?;
    let inserted = EntityRepo::insert_entity(&savepoint, &entity).and_then(|()| {
        EntityRepo::set_natural_key(&savepoint, &change.target_type, &id, digest.as_deref())
    });
    let conflict = match inserted {
        Ok(()) => {
            savepoint.commit().map_err(from_rusqlite)?;
            ctx.entities.insert(id.clone(), entity);
            return Ok(id);
        }
        Err(err) if err.kind() == ExErrorKind::DisambiguationConflict => err,
        Err(err) => return Err(err),
    };
    // Dropping the savepoint rolls the insert back
    drop(savepoint);

    let Some(digest) = digest else {
        return Err(conflict);
    };
    let Some(holder) = EntityRepo::find_by_natural_key(tx, &change.target_type, &digest)? else {
        return Err(conflict);
    };
    let existing = EntityRepo::resolve_canonical(tx, &change.target_type, &holder)?
        .ok_or_else(|| conflict.clone())?;

    change
        .convert_to_update(existing.id.clone())
        .map_err(ExError::from)?;
    ChangeRepo::record_disambiguation(tx, change)?;
    tracing::info!(
        change_id = change.id.0,
        entity_type = change.target_type.as_str(),
        entity_id = existing.id.as_str(),
        "Create collided on natural key, applying as update"
    );

    let existing_id = existing.id.clone();
    ctx.entities.entry(existing_id.clone()).or_insert(existing);
    Ok(existing_id)
}

/// Canonical target of an update
fn locate(conn: &Connection, ctx: &mut ApplyContext<'_>, change: &Change) -> Result<EntityId> {
    let requested = change.target_id.as_ref().ok_or_else(|| {
        ExError::new(ExErrorKind::InvariantViolation)
            .with_op("apply_update")
            .with_node_id(change.node_id.as_str())
            .with_message("update has no target")
    })?;
    let entity = EntityRepo::resolve_canonical(conn, &change.target_type, requested)?
        .ok_or_else(|| {
            ExError::from(CatalogError::EntityNotFound {
                entity_type: change.target_type.clone(),
                entity_id: requested.to_string(),
            })
            .with_op("apply_update")
            .with_node_id(change.node_id.as_str())
        })?;
    let id = entity.id.clone();
    ctx.entities.entry(id.clone()).or_insert(entity);
    Ok(id)
}

/// Apply the Change's fields onto its target and write one version
fn relate_and_version(
    conn: &Connection,
    ctx: &mut ApplyContext<'_>,
    change: &Change,
    id: &EntityId,
) -> Result<Version> {
    let spec = type_spec(ctx.registry, &change.target_type, "apply_change")?;
    let resolver = Resolver::new(conn, ctx.registry, &ctx.scope);
    let entity = ctx.entities.get_mut(id).ok_or_else(|| {
        ExError::new(ExErrorKind::Internal)
            .with_op("apply_change")
            .with_entity_id(id.as_str())
            .with_message("target was not materialized")
    })?;
    let source = entity.entity_ref();

    for (name, raw) in &change.payload.fields {
        let field = spec
            .fields
            .get(name)
            .ok_or_else(|| schema_violation(change, format!("unknown field '{}'", name)))?;
        let value = FieldValue::from_json(field, raw)
            .map_err(|reason| schema_violation(change, format!("{}: {}", name, reason)))?;
        match value {
            FieldValue::Null if field.kind.is_relation() => {
                entity.relations.remove(name);
                EntityRepo::set_relation(conn, &source, name, None)?;
            }
            FieldValue::Null => {
                entity.fields.insert(name.clone(), serde_json::Value::Null);
            }
            FieldValue::Literal(v) => {
                entity.fields.insert(name.clone(), v);
            }
            FieldValue::Reference(r) => {
                let target = resolve_target(&resolver, change, name, field, &r)?;
                let relation = RelationValue::One(target);
                EntityRepo::set_relation(conn, &source, name, Some(&relation))?;
                entity.relations.insert(name.clone(), relation);
            }
            FieldValue::References(rs) => {
                let targets = rs
                    .iter()
                    .map(|r| resolve_target(&resolver, change, name, field, r))
                    .collect::<Result<Vec<_>>>()?;
                let relation = RelationValue::Many(targets);
                EntityRepo::set_relation(conn, &source, name, Some(&relation))?;
                entity.relations.insert(name.clone(), relation);
            }
        }
    }

    if let Some(bag) = &change.payload.extra {
        entity.record_extra(ctx.submitter, bag.clone());
    }
    let digest = spec.natural_key_digest(&entity.entity_type, &entity.fields);
    EntityRepo::set_natural_key(conn, &entity.entity_type, &entity.id, digest.as_deref())?;

    let version = EntityRepo::write_version(conn, entity, Some(change.id), ctx.now)?;
    ChangeRepo::record_target(conn, change.id, &entity.id, Some(version.version_id))?;
    EntityRepo::add_source(conn, &entity.id, ctx.submitter)?;
    if !entity.sources.iter().any(|s| s == ctx.submitter) {
        entity.sources.push(ctx.submitter.to_string());
        entity.sources.sort();
    }
    Ok(version)
}

fn resolve_target(
    resolver: &Resolver<'_>,
    change: &Change,
    field_name: &str,
    field: &FieldSpec,
    reference: &Reference,
) -> Result<EntityRef> {
    let target = resolver.resolve(reference)?;
    if !field.accepts_target(&target.entity_type) {
        return Err(schema_violation(
            change,
            format!(
                "{}: {} is not a legal target (expected one of {:?})",
                field_name, target.entity_type, field.relation_targets
            ),
        ));
    }
    Ok(target)
}

fn schema_violation(change: &Change, reason: String) -> ExError {
    ExError::from(CatalogError::SchemaViolation {
        node_id: change.node_id.to_string(),
        node_type: change.target_type.clone(),
        reason,
    })
    .with_op("apply_change")
}
