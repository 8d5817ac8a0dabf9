//! Change ledger repository
//!
//! Change-sets and their Changes. Apart from target bookkeeping, the one
//! mutation allowed on a written Change is the create→update conversion,
//! see [`ChangeRepo::record_disambiguation`].

use crate::errors::{corrupt_column, from_rusqlite, Result};
use catalog_core::errors::{ExError, ExErrorKind};
use catalog_core::model::{
    Change, ChangeId, ChangeKind, ChangePayload, ChangeSet, ChangeSetId, ChangeSetStatus,
    EntityId, NewChange, NodeId, VersionId,
};
use rusqlite::{Connection, OptionalExtension};

const CHANGE_COLUMNS: &str = "id, change_set_id, node_id, kind, target_type, target_id, \
     target_version_id, payload, disambiguated";

struct ChangeRow {
    id: i64,
    change_set_id: i64,
    node_id: String,
    kind: String,
    target_type: String,
    target_id: Option<String>,
    target_version_id: Option<i64>,
    payload: String,
    disambiguated: bool,
}

impl ChangeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            change_set_id: row.get(1)?,
            node_id: row.get(2)?,
            kind: row.get(3)?,
            target_type: row.get(4)?,
            target_id: row.get(5)?,
            target_version_id: row.get(6)?,
            payload: row.get(7)?,
            disambiguated: row.get(8)?,
        })
    }

    fn into_change(self) -> Result<Change> {
        let node_id = NodeId::try_from(self.node_id).map_err(|reason| {
            ExError::new(ExErrorKind::Serialization)
                .with_op("list_changes")
                .with_change_id(self.id)
                .with_message(reason)
        })?;
        let kind = ChangeKind::parse(&self.kind).map_err(ExError::from)?;
        let payload: ChangePayload = serde_json::from_str(&self.payload)
            .map_err(|e| corrupt_column("list_changes", "changes.payload", e))?;
        Ok(Change {
            id: ChangeId(self.id),
            change_set_id: ChangeSetId(self.change_set_id),
            node_id,
            kind,
            target_type: self.target_type,
            target_id: self.target_id.map(EntityId::from_string),
            target_version_id: self.target_version_id.map(VersionId),
            payload,
            disambiguated: self.disambiguated,
        })
    }
}

/// SQLite repository for the change ledger
pub struct ChangeRepo;

impl ChangeRepo {
    /// Open a new pending change-set
    pub fn create_change_set(
        conn: &Connection,
        submitter: &str,
        schema_version: &str,
        now_ms: i64,
    ) -> Result<ChangeSetId> {
        conn.execute(
            "INSERT INTO change_sets (submitter, status, schema_version, submitted_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                submitter,
                ChangeSetStatus::Pending.as_str(),
                schema_version,
                now_ms
            ],
        )
        .map_err(from_rusqlite)?;
        Ok(ChangeSetId(conn.last_insert_rowid()))
    }

    pub fn insert_change(
        conn: &Connection,
        change_set_id: ChangeSetId,
        change: &NewChange,
    ) -> Result<ChangeId> {
        let payload = serde_json::to_string(&change.payload).map_err(|e| {
            ExError::new(ExErrorKind::Serialization)
                .with_op("insert_change")
                .with_node_id(change.node_id.as_str())
                .with_message(e.to_string())
        })?;
        conn.execute(
            "INSERT INTO changes (change_set_id, node_id, kind, target_type, target_id, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                change_set_id.0,
                change.node_id.as_str(),
                change.kind.as_str(),
                change.target_type,
                change.target_id.as_ref().map(EntityId::as_str),
                payload,
            ],
        )
        .map_err(|e| {
            from_rusqlite(e)
                .with_change_set_id(change_set_id.0)
                .with_node_id(change.node_id.as_str())
        })?;
        Ok(ChangeId(conn.last_insert_rowid()))
    }

    pub fn get_change_set(conn: &Connection, id: ChangeSetId) -> Result<Option<ChangeSet>> {
        let row = conn
            .query_row(
                "SELECT id, submitter, status, schema_version, submitted_at, finalized_at, error_json
                 FROM change_sets WHERE id = ?",
                [id.0],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(from_rusqlite)?;

        let Some((id, submitter, status, schema_version, submitted_at, finalized_at, error)) = row
        else {
            return Ok(None);
        };
        let error = error
            .map(|e| serde_json::from_str(&e))
            .transpose()
            .map_err(|e| corrupt_column("get_change_set", "change_sets.error_json", e))?;
        Ok(Some(ChangeSet {
            id: ChangeSetId(id),
            submitter,
            status: ChangeSetStatus::parse(&status).map_err(ExError::from)?,
            schema_version,
            submitted_at,
            finalized_at,
            error,
        }))
    }

    /// Changes of a change-set in the order they were written
    pub fn list_changes(conn: &Connection, change_set_id: ChangeSetId) -> Result<Vec<Change>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM changes WHERE change_set_id = ? ORDER BY id",
                CHANGE_COLUMNS
            ))
            .map_err(from_rusqlite)?;
        let rows = stmt
            .query_map([change_set_id.0], ChangeRow::from_row)
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        rows.into_iter().map(ChangeRow::into_change).collect()
    }

    /// Record the entity and version a Change resolved to
    pub fn record_target(
        conn: &Connection,
        change_id: ChangeId,
        target_id: &EntityId,
        target_version_id: Option<VersionId>,
    ) -> Result<()> {
        conn.execute(
            "UPDATE changes SET target_id = ?1, target_version_id = ?2 WHERE id = ?3",
            rusqlite::params![target_id.as_str(), target_version_id.map(|v| v.0), change_id.0],
        )
        .map_err(|e| from_rusqlite(e).with_change_id(change_id.0))?;
        Ok(())
    }

    /// Persist a create→update conversion made by [`Change::convert_to_update`]
    ///
    /// # Errors
    ///
    /// `InvariantViolation` unless the stored row is still an unconverted
    /// create.
    pub fn record_disambiguation(conn: &Connection, change: &Change) -> Result<()> {
        let target = change.target_id.as_ref().ok_or_else(|| {
            ExError::new(ExErrorKind::InvariantViolation)
                .with_op("record_disambiguation")
                .with_change_id(change.id.0)
                .with_message("converted change has no target")
        })?;
        let updated = conn
            .execute(
                "UPDATE changes SET kind = ?1, target_id = ?2, disambiguated = 1
                 WHERE id = ?3 AND kind = ?4 AND disambiguated = 0",
                rusqlite::params![
                    ChangeKind::Update.as_str(),
                    target.as_str(),
                    change.id.0,
                    ChangeKind::Create.as_str(),
                ],
            )
            .map_err(|e| from_rusqlite(e).with_change_id(change.id.0))?;
        if updated != 1 {
            return Err(ExError::new(ExErrorKind::InvariantViolation)
                .with_op("record_disambiguation")
                .with_change_id(change.id.0)
                .with_message("only an unconverted create can become an update"));
        }
        Ok(())
    }

    /// Move a pending change-set to a terminal status
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown change-set, `InvariantViolation` if it is
    /// not pending.
    pub fn finalize(
        conn: &Connection,
        id: ChangeSetId,
        status: ChangeSetStatus,
        error: Option<&serde_json::Value>,
        now_ms: i64,
    ) -> Result<()> {
        let current = Self::get_change_set(conn, id)?.ok_or_else(|| {
            ExError::new(ExErrorKind::NotFound)
                .with_op("finalize_change_set")
                .with_change_set_id(id.0)
        })?;
        current
            .status
            .transition(status)
            .map_err(|e| ExError::from(e).with_change_set_id(id.0))?;

        conn.execute(
            "UPDATE change_sets SET status = ?1, finalized_at = ?2, error_json = ?3
             WHERE id = ?4 AND status = ?5",
            rusqlite::params![
                status.as_str(),
                now_ms,
                error.map(|e| e.to_string()),
                id.0,
                ChangeSetStatus::Pending.as_str(),
            ],
        )
        .map_err(|e| from_rusqlite(e).with_change_set_id(id.0))?;
        Ok(())
    }
}
