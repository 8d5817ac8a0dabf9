//! Error handling for catalog-store
//!
//! Store failures surface as `ExError`. SQLite failures are classified so the
//! engine can tell a retryable lock conflict and a natural-key collision
//! apart from other persistence errors.

use catalog_core::errors::{ExError, ExErrorKind};
use rusqlite::ErrorCode;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Table whose unique index carries the disambiguation rule
const NATURAL_KEY_TABLE: &str = "entity_keys";

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::InvariantViolation)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: expected {}, got {}",
            migration_id, expected, actual
        ))
}

/// Create a database error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    let kind = classify(&err);
    ExError::new(kind)
        .with_op("sqlite")
        .with_message(err.to_string())
}

fn classify(err: &rusqlite::Error) -> ExErrorKind {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => match e.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                ExErrorKind::ConcurrentModification
            }
            ErrorCode::ConstraintViolation
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    && msg
                        .as_deref()
                        .is_some_and(|m| m.contains(NATURAL_KEY_TABLE)) =>
            {
                ExErrorKind::DisambiguationConflict
            }
            _ => ExErrorKind::Persistence,
        },
        _ => ExErrorKind::Persistence,
    }
}

/// Create a serialization error for a stored JSON column
pub fn corrupt_column(op: &str, column: &str, err: serde_json::Error) -> ExError {
    ExError::new(ExErrorKind::Serialization)
        .with_op(op.to_string())
        .with_message(format!("Cannot decode {}: {}", column, err))
}

/// Create an IO error
pub fn io_error(operation: &str, err: std::io::Error) -> ExError {
    ExError::new(ExErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_natural_key_collision_is_disambiguation_conflict() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE entity_keys (entity_type TEXT, key_digest TEXT, UNIQUE (entity_type, key_digest));
             INSERT INTO entity_keys VALUES ('Person', 'k');",
        )
        .unwrap();
        let err = conn
            .execute("INSERT INTO entity_keys VALUES ('Person', 'k')", [])
            .unwrap_err();
        assert_eq!(
            from_rusqlite(err).kind(),
            ExErrorKind::DisambiguationConflict
        );
    }

    #[test]
    fn test_other_unique_failures_are_persistence_errors() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (x TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert_eq!(from_rusqlite(err).kind(), ExErrorKind::Persistence);
    }
}
