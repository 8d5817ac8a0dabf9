//! Database connection management

use crate::errors::{from_rusqlite, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Default time a writer waits on a locked database
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Open a SQLite database at the given path
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    Connection::open(path).map_err(from_rusqlite)
}

/// Open an in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(from_rusqlite)
}

/// Configure a connection: foreign keys, WAL journal, busy timeout
///
/// A writer that still finds the database locked once `busy_timeout_ms`
/// has elapsed fails with `ConcurrentModification`.
pub fn configure(conn: &Connection, busy_timeout_ms: u64) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", true)
        .map_err(from_rusqlite)?;

    // In-memory databases answer "memory"; only file databases switch to WAL.
    let _mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(from_rusqlite)?;

    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
        .map_err(from_rusqlite)?;

    Ok(())
}

/// Open, configure and migrate a database file
pub fn open_and_migrate<P: AsRef<Path>>(path: P, busy_timeout_ms: u64) -> Result<Connection> {
    let mut conn = open(path)?;
    configure(&conn, busy_timeout_ms)?;
    crate::migrations::apply_migrations(&mut conn)?;
    Ok(conn)
}

/// In-memory equivalent of [`open_and_migrate`]
pub fn open_in_memory_migrated() -> Result<Connection> {
    let mut conn = open_in_memory()?;
    configure(&conn, DEFAULT_BUSY_TIMEOUT_MS)?;
    crate::migrations::apply_migrations(&mut conn)?;
    Ok(conn)
}
