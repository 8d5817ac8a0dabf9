//! Merge application
//!
//! A merge redirects a set of duplicate entities onto one canonical entity.
//! Every relation row in the type's declared participation list that points
//! at a duplicate is rewritten in place to point at the canonical entity,
//! each referring entity gets a new version, and each duplicate is stamped
//! `same_as → into` and versioned. No row is deleted.

#![allow(clippy::result_large_err)]

use std::time::Instant;

use catalog_core::errors::{CatalogError, ExError, ExErrorKind};
use catalog_core::model::{Change, EntityId, EntityRef, SchemaRegistry, VersionId};
use catalog_core::{log_op_end, log_op_error, log_op_start};
use catalog_store::errors::Result;
use catalog_store::{ChangeRepo, EntityRepo};
use chrono::Utc;
use rusqlite::Connection;

use crate::resolver::Resolver;

/// What one merge wrote
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub into: EntityRef,
    /// Current version of `into` once the merge is done
    pub into_version: Option<VersionId>,
    /// Duplicates now redirected to `into`
    pub merged: Vec<EntityRef>,
    /// Relation rows rewritten
    pub redirected: usize,
    /// Every entity that received a version, duplicates included
    pub touched: Vec<EntityRef>,
    /// Modification time shared by every touched row
    pub modified_at: i64,
}

/// Apply one merge Change inside the caller's transaction
///
/// # Errors
///
/// `InvalidMerge` for a Change without a directive or whose entities are
/// not of the Change's type; resolution and store errors otherwise.
pub fn apply_merge(
    conn: &Connection,
    registry: &SchemaRegistry,
    resolver: &Resolver<'_>,
    change: &Change,
) -> Result<MergeOutcome> {
    let start = Instant::now();
    log_op_start!(
        "merge",
        change_id = change.id.0,
        entity_type = change.target_type.as_str()
    );

    let result = merge_inner(conn, registry, resolver, change);

    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(outcome) => {
            log_op_end!(
                "merge",
                duration_ms = duration_ms,
                change_id = change.id.0,
                entity_id = outcome.into.id.as_str(),
                merged_count = outcome.merged.len(),
                redirected_count = outcome.redirected,
                touched_count = outcome.touched.len(),
                modified_at = outcome.modified_at
            );
        }
        Err(e) => {
            log_op_error!("merge", e.clone(), duration_ms = duration_ms, change_id = change.id.0);
        }
    }
    result
}

fn merge_inner(
    conn: &Connection,
    registry: &SchemaRegistry,
    resolver: &Resolver<'_>,
    change: &Change,
) -> Result<MergeOutcome> {
    let directive = change.payload.merge.as_ref().ok_or_else(|| {
        ExError::from(CatalogError::InvalidMerge {
            reason: format!("change {} carries no merge directive", change.id),
        })
    })?;
    let entity_type = change.target_type.as_str();

    let into = resolver.resolve(&directive.into)?;
    check_type(entity_type, &into)?;

    let mut from_ids: Vec<EntityId> = Vec::with_capacity(directive.from.len());
    for reference in &directive.from {
        let target = resolver.resolve(reference)?;
        check_type(entity_type, &target)?;
        if target.id != into.id && !from_ids.contains(&target.id) {
            from_ids.push(target.id);
        }
    }

    let modified_at = Utc::now().timestamp_millis();
    let referrers = registry.referrers_of(entity_type);

    // Read the whole scope in one statement before any row is rewritten
    let scope = EntityRepo::merge_scope(conn, &from_ids, &referrers)?;
    let redirected = EntityRepo::redirect_relations(conn, &from_ids, &into, &referrers)?;

    let mut touched = Vec::with_capacity(scope.len() + from_ids.len());
    for source in scope.iter().filter(|s| !from_ids.contains(&s.id)) {
        let mut entity = load(conn, &source.id)?;
        EntityRepo::write_version(conn, &mut entity, Some(change.id), modified_at)?;
        touched.push(entity.entity_ref());
    }

    let into_version = load(conn, &into.id)?.version_id;
    let mut merged = Vec::with_capacity(from_ids.len());
    for id in &from_ids {
        let mut entity = load(conn, id)?;
        entity.same_as = Some(into.id.clone());
        entity.same_as_version = into_version;
        EntityRepo::write_version(conn, &mut entity, Some(change.id), modified_at)?;
        merged.push(entity.entity_ref());
        touched.push(entity.entity_ref());
    }

    ChangeRepo::record_target(conn, change.id, &into.id, into_version)?;

    Ok(MergeOutcome {
        into,
        into_version,
        merged,
        redirected,
        touched,
        modified_at,
    })
}

fn check_type(entity_type: &str, target: &EntityRef) -> Result<()> {
    if target.entity_type != entity_type {
        return Err(ExError::from(CatalogError::InvalidMerge {
            reason: format!(
                "{} is not a {}, a merge joins entities of one type",
                target, entity_type
            ),
        }));
    }
    Ok(())
}

fn load(conn: &Connection, id: &EntityId) -> Result<catalog_core::model::Entity> {
    EntityRepo::get_entity(conn, id)?.ok_or_else(|| {
        ExError::new(ExErrorKind::InvariantViolation)
            .with_op("merge")
            .with_entity_id(id.as_str())
            .with_message("entity vanished during merge")
    })
}
