//! Entity repository
//!
//! Current entity rows, their append-only versions, relation rows, natural
//! keys and sources. Functions take a `&Connection` so they run the same
//! inside a transaction or a savepoint (both deref to `Connection`).

use std::collections::BTreeMap;

use crate::errors::{corrupt_column, from_rusqlite, Result};
use catalog_core::errors::{ExError, ExErrorKind};
use catalog_core::model::{
    ChangeId, Entity, EntityId, EntityRef, RelationValue, Version, VersionId,
};
use rusqlite::{params_from_iter, Connection, OptionalExtension};

/// Longest `same_as` chain followed when resolving an entity
pub const MAX_REDIRECT_DEPTH: usize = 16;

const ENTITY_COLUMNS: &str = "id, entity_type, fields, extra, same_as_id, same_as_version_id, \
     version_id, version_number, change_id, created_at, modified_at";

const VERSION_COLUMNS: &str =
    "version_id, entity_type, entity_id, version_number, state, change_id, created_at";

/// Raw entity row, decoded outside the rusqlite row closure
struct EntityRow {
    id: String,
    entity_type: String,
    fields: String,
    extra: String,
    same_as_id: Option<String>,
    same_as_version_id: Option<i64>,
    version_id: Option<i64>,
    version_number: u32,
    change_id: Option<i64>,
    created_at: i64,
    modified_at: i64,
}

impl EntityRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            fields: row.get(2)?,
            extra: row.get(3)?,
            same_as_id: row.get(4)?,
            same_as_version_id: row.get(5)?,
            version_id: row.get(6)?,
            version_number: row.get(7)?,
            change_id: row.get(8)?,
            created_at: row.get(9)?,
            modified_at: row.get(10)?,
        })
    }

    fn into_entity(self) -> Result<Entity> {
        let fields = serde_json::from_str(&self.fields)
            .map_err(|e| corrupt_column("get_entity", "entities.fields", e))?;
        let extra = serde_json::from_str(&self.extra)
            .map_err(|e| corrupt_column("get_entity", "entities.extra", e))?;
        let mut entity = Entity::new(self.entity_type, EntityId::from_string(self.id), self.created_at);
        entity.fields = fields;
        entity.extra = extra;
        entity.same_as = self.same_as_id.map(EntityId::from_string);
        entity.same_as_version = self.same_as_version_id.map(VersionId);
        entity.version_id = self.version_id.map(VersionId);
        entity.version_number = self.version_number;
        entity.change_id = self.change_id.map(ChangeId);
        entity.modified_at = self.modified_at;
        Ok(entity)
    }
}

fn version_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Version> {
    Ok(Version {
        version_id: VersionId(row.get(0)?),
        entity_type: row.get(1)?,
        entity_id: EntityId::from_string(row.get::<_, String>(2)?),
        version_number: row.get(3)?,
        state: row.get(4)?,
        change_id: row.get::<_, Option<i64>>(5)?.map(ChangeId),
        created_at: row.get(6)?,
    })
}

fn to_json<T: serde::Serialize>(op: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        ExError::new(ExErrorKind::Serialization)
            .with_op(op.to_string())
            .with_message(e.to_string())
    })
}

/// `?, ?, ?` for `n` parameters
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// SQL predicate and parameters restricting relation rows to the declared
/// `(source_type, field)` participation list and to targets in `target_ids`
fn merge_predicate(target_ids: &[EntityId], referrers: &[(String, String)]) -> (String, Vec<String>) {
    let pairs = vec!["(source_type = ? AND field = ?)"; referrers.len()].join(" OR ");
    let sql = format!(
        "target_id IN ({}) AND ({})",
        placeholders(target_ids.len()),
        pairs
    );
    let mut params: Vec<String> = target_ids.iter().map(|id| id.as_str().to_string()).collect();
    for (source_type, field) in referrers {
        params.push(source_type.clone());
        params.push(field.clone());
    }
    (sql, params)
}

/// SQLite repository for catalog entities
pub struct EntityRepo;

impl EntityRepo {
    /// Insert a new current row
    ///
    /// The row has no version yet; the caller writes one with
    /// [`EntityRepo::write_version`].
    pub fn insert_entity(conn: &Connection, entity: &Entity) -> Result<()> {
        conn.execute(
            "INSERT INTO entities (id, entity_type, fields, extra, version_number, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
            rusqlite::params![
                entity.id.as_str(),
                entity.entity_type,
                to_json("insert_entity", &entity.fields)?,
                to_json("insert_entity", &entity.extra)?,
                entity.created_at,
                entity.modified_at,
            ],
        )
        .map_err(|e| {
            from_rusqlite(e)
                .with_entity_type(entity.entity_type.clone())
                .with_entity_id(entity.id.as_str())
        })?;
        Ok(())
    }

    /// Overwrite the current row with `entity`
    pub fn update_entity(conn: &Connection, entity: &Entity) -> Result<()> {
        let updated = conn
            .execute(
                "UPDATE entities SET
                    fields = ?1,
                    extra = ?2,
                    same_as_id = ?3,
                    same_as_version_id = ?4,
                    version_id = ?5,
                    version_number = ?6,
                    change_id = ?7,
                    modified_at = ?8
                 WHERE id = ?9",
                rusqlite::params![
                    to_json("update_entity", &entity.fields)?,
                    to_json("update_entity", &entity.extra)?,
                    entity.same_as.as_ref().map(EntityId::as_str),
                    entity.same_as_version.map(|v| v.0),
                    entity.version_id.map(|v| v.0),
                    entity.version_number,
                    entity.change_id.map(|c| c.0),
                    entity.modified_at,
                    entity.id.as_str(),
                ],
            )
            .map_err(from_rusqlite)?;

        if updated == 0 {
            return Err(ExError::new(ExErrorKind::NotFound)
                .with_op("update_entity")
                .with_entity_type(entity.entity_type.clone())
                .with_entity_id(entity.id.as_str()));
        }
        Ok(())
    }

    /// Write the next version of `entity` and advance its current pointer
    ///
    /// Stamps the entity with `change_id` and `now_ms`, snapshots it, appends
    /// the version row and updates the current row to point at it.
    pub fn write_version(
        conn: &Connection,
        entity: &mut Entity,
        change_id: Option<ChangeId>,
        now_ms: i64,
    ) -> Result<Version> {
        entity.change_id = change_id;
        entity.modified_at = now_ms;
        let version_number = entity.version_number + 1;
        let state = entity.snapshot().map_err(ExError::from)?;

        conn.execute(
            "INSERT INTO entity_versions (entity_type, entity_id, version_number, state, change_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                entity.entity_type,
                entity.id.as_str(),
                version_number,
                state,
                change_id.map(|c| c.0),
                now_ms,
            ],
        )
        .map_err(|e| from_rusqlite(e).with_entity_id(entity.id.as_str()))?;

        let version_id = VersionId(conn.last_insert_rowid());
        entity.version_id = Some(version_id);
        entity.version_number = version_number;
        Self::update_entity(conn, entity)?;

        Ok(Version {
            version_id,
            entity_type: entity.entity_type.clone(),
            entity_id: entity.id.clone(),
            version_number,
            state,
            change_id,
            created_at: now_ms,
        })
    }

    /// Load an entity with its relations and sources
    pub fn get_entity(conn: &Connection, id: &EntityId) -> Result<Option<Entity>> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM entities WHERE id = ?", ENTITY_COLUMNS),
                [id.as_str()],
                EntityRow::from_row,
            )
            .optional()
            .map_err(from_rusqlite)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut entity = row.into_entity()?;
        entity.relations = Self::load_relations(conn, &entity.id)?;
        entity.sources = Self::list_sources(conn, &entity.id)?;
        Ok(Some(entity))
    }

    /// Load an entity, requiring it to be of `entity_type` (declared spelling)
    pub fn get_typed(
        conn: &Connection,
        entity_type: &str,
        id: &EntityId,
    ) -> Result<Option<Entity>> {
        Ok(Self::get_entity(conn, id)?.filter(|e| e.entity_type == entity_type))
    }

    /// Load an entity and follow its `same_as` redirects to the canonical one
    ///
    /// # Errors
    ///
    /// `InvariantViolation` on a redirect cycle or a chain longer than
    /// [`MAX_REDIRECT_DEPTH`].
    pub fn resolve_canonical(
        conn: &Connection,
        entity_type: &str,
        id: &EntityId,
    ) -> Result<Option<Entity>> {
        let Some(mut entity) = Self::get_typed(conn, entity_type, id)? else {
            return Ok(None);
        };
        for _ in 0..MAX_REDIRECT_DEPTH {
            let Some(next) = entity.same_as.clone() else {
                return Ok(Some(entity));
            };
            entity = Self::get_typed(conn, entity_type, &next)?.ok_or_else(|| {
                ExError::new(ExErrorKind::InvariantViolation)
                    .with_op("resolve_canonical")
                    .with_entity_type(entity_type)
                    .with_entity_id(next.as_str())
                    .with_message("same_as points at a missing entity")
            })?;
        }
        Err(ExError::new(ExErrorKind::InvariantViolation)
            .with_op("resolve_canonical")
            .with_entity_type(entity_type)
            .with_entity_id(id.as_str())
            .with_message(format!(
                "same_as chain longer than {}",
                MAX_REDIRECT_DEPTH
            )))
    }

    pub fn get_version(conn: &Connection, version_id: VersionId) -> Result<Option<Version>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM entity_versions WHERE version_id = ?",
                VERSION_COLUMNS
            ),
            [version_id.0],
            version_from_row,
        )
        .optional()
        .map_err(from_rusqlite)
    }

    /// Every version of an entity, oldest first
    pub fn list_versions(conn: &Connection, id: &EntityId) -> Result<Vec<Version>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM entity_versions WHERE entity_id = ? ORDER BY version_number",
                VERSION_COLUMNS
            ))
            .map_err(from_rusqlite)?;
        let versions = stmt
            .query_map([id.as_str()], version_from_row)
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        Ok(versions)
    }

    /// Replace the rows of one relation field
    ///
    /// Each target is pinned to its current version. A target created in
    /// the same change-set may not have one yet; see
    /// [`EntityRepo::pin_unversioned_relations`].
    pub fn set_relation(
        conn: &Connection,
        source: &EntityRef,
        field: &str,
        value: Option<&RelationValue>,
    ) -> Result<()> {
        conn.execute(
            "DELETE FROM entity_relations WHERE source_id = ?1 AND field = ?2",
            rusqlite::params![source.id.as_str(), field],
        )
        .map_err(from_rusqlite)?;

        let Some(value) = value else {
            return Ok(());
        };
        let is_list = matches!(value, RelationValue::Many(_));
        for (position, target) in value.targets().iter().enumerate() {
            conn.execute(
                "INSERT INTO entity_relations
                    (source_id, source_type, field, position, is_list, target_type, target_id, target_version_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7,
                    (SELECT version_id FROM entities WHERE id = ?7))",
                rusqlite::params![
                    source.id.as_str(),
                    source.entity_type,
                    field,
                    position as i64,
                    is_list,
                    target.entity_type,
                    target.id.as_str(),
                ],
            )
            .map_err(|e| {
                from_rusqlite(e)
                    .with_entity_type(target.entity_type.clone())
                    .with_entity_id(target.id.as_str())
            })?;
        }
        Ok(())
    }

    /// Pin relation rows written before their target had a version
    pub fn pin_unversioned_relations(conn: &Connection) -> Result<usize> {
        conn.execute(
            "UPDATE entity_relations
             SET target_version_id = (SELECT version_id FROM entities WHERE id = entity_relations.target_id)
             WHERE target_version_id IS NULL",
            [],
        )
        .map_err(from_rusqlite)
    }

    /// Current relation values of an entity, keyed by field
    pub fn load_relations(
        conn: &Connection,
        id: &EntityId,
    ) -> Result<BTreeMap<String, RelationValue>> {
        let mut stmt = conn
            .prepare(
                "SELECT field, is_list, target_type, target_id FROM entity_relations
                 WHERE source_id = ? ORDER BY field, position",
            )
            .map_err(from_rusqlite)?;
        let rows = stmt
            .query_map([id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    EntityRef::new(
                        row.get::<_, String>(2)?,
                        EntityId::from_string(row.get::<_, String>(3)?),
                    ),
                ))
            })
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;

        let mut relations = BTreeMap::new();
        for (field, is_list, target) in rows {
            if is_list {
                match relations
                    .entry(field)
                    .or_insert_with(|| RelationValue::Many(Vec::new()))
                {
                    RelationValue::Many(targets) => targets.push(target),
                    RelationValue::One(_) => {}
                }
            } else {
                relations.insert(field, RelationValue::One(target));
            }
        }
        Ok(relations)
    }

    /// Point `id` at `key_digest`, replacing any key it held
    ///
    /// A key still held by a duplicate merged into `id` already resolves to
    /// `id` and is left with the duplicate.
    ///
    /// # Errors
    ///
    /// `DisambiguationConflict` when another canonical entity of the type
    /// already holds the key.
    pub fn set_natural_key(
        conn: &Connection,
        entity_type: &str,
        id: &EntityId,
        key_digest: Option<&str>,
    ) -> Result<()> {
        conn.execute("DELETE FROM entity_keys WHERE entity_id = ?", [id.as_str()])
            .map_err(from_rusqlite)?;
        if let Some(digest) = key_digest {
            if let Some(holder) = Self::find_by_natural_key(conn, entity_type, digest)? {
                let canonical = Self::resolve_canonical(conn, entity_type, &holder)?;
                if canonical.is_some_and(|e| e.id == *id) {
                    return Ok(());
                }
            }
            conn.execute(
                "INSERT INTO entity_keys (entity_type, key_digest, entity_id) VALUES (?1, ?2, ?3)",
                rusqlite::params![entity_type, digest, id.as_str()],
            )
            .map_err(|e| {
                from_rusqlite(e)
                    .with_op("set_natural_key")
                    .with_entity_type(entity_type)
                    .with_entity_id(id.as_str())
            })?;
        }
        Ok(())
    }

    /// Entity currently holding a natural key
    pub fn find_by_natural_key(
        conn: &Connection,
        entity_type: &str,
        key_digest: &str,
    ) -> Result<Option<EntityId>> {
        conn.query_row(
            "SELECT entity_id FROM entity_keys WHERE entity_type = ?1 AND key_digest = ?2",
            rusqlite::params![entity_type, key_digest],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map(|id| id.map(EntityId::from_string))
        .map_err(from_rusqlite)
    }

    /// Record that `submitter` contributed to `id` (idempotent)
    pub fn add_source(conn: &Connection, id: &EntityId, submitter: &str) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO entity_sources (entity_id, submitter) VALUES (?1, ?2)",
            rusqlite::params![id.as_str(), submitter],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }

    pub fn list_sources(conn: &Connection, id: &EntityId) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare("SELECT submitter FROM entity_sources WHERE entity_id = ? ORDER BY submitter")
            .map_err(from_rusqlite)?;
        let sources = stmt
            .query_map([id.as_str()], |row| row.get(0))
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(from_rusqlite)?;
        Ok(sources)
    }

    /// Entities whose declared relation fields point at any of `from_ids`
    ///
    /// Reads the whole scope in one statement. Inside an `IMMEDIATE`
    /// transaction the database write lock is already held, so no other
    /// writer can change the scope between this read and the redirect.
    pub fn merge_scope(
        conn: &Connection,
        from_ids: &[EntityId],
        referrers: &[(String, String)],
    ) -> Result<Vec<EntityRef>> {
        if from_ids.is_empty() || referrers.is_empty() {
            return Ok(Vec::new());
        }
        let (predicate, params) = merge_predicate(from_ids, referrers);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT DISTINCT source_type, source_id FROM entity_relations WHERE {} ORDER BY source_id",
                predicate
            ))
            .map_err(from_rusqlite)?;
        let scope = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok(EntityRef::new(
                    row.get::<_, String>(0)?,
                    EntityId::from_string(row.get::<_, String>(1)?),
                ))
            })
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        Ok(scope)
    }

    /// Rewrite relation rows pointing at `from_ids` to point at `into`
    ///
    /// Rows are updated in place and re-pinned to `into`'s current version.
    /// Returns the number of rows rewritten.
    pub fn redirect_relations(
        conn: &Connection,
        from_ids: &[EntityId],
        into: &EntityRef,
        referrers: &[(String, String)],
    ) -> Result<usize> {
        if from_ids.is_empty() || referrers.is_empty() {
            return Ok(0);
        }
        let (predicate, predicate_params) = merge_predicate(from_ids, referrers);
        let mut params = vec![
            into.id.as_str().to_string(),
            into.entity_type.clone(),
            into.id.as_str().to_string(),
        ];
        params.extend(predicate_params);
        conn.execute(
            &format!(
                "UPDATE entity_relations
                 SET target_id = ?, target_type = ?,
                     target_version_id = (SELECT version_id FROM entities WHERE id = ?)
                 WHERE {}",
                predicate
            ),
            params_from_iter(params.iter()),
        )
        .map_err(from_rusqlite)
    }
}
