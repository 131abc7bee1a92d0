//! Safe write access to browser SQLite stores.
//!
//! Every change to a browser store goes through here:
//! 1. the store exists and no running browser holds it
//! 2. a quick integrity check passes
//! 3. all writes run in one transaction
//! 4. commit only on success; any error rolls back and leaves the store unchanged

use rusqlite::{Connection, OpenFlags, Transaction};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Open a store read-only.
pub fn open_read_only(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        return Err(Error::SourceMissing(db_path.to_path_buf()));
    }
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
    )?;
    Ok(conn)
}

/// Run `PRAGMA quick_check`; a failed check is an invalid format.
pub fn check_integrity(conn: &Connection, db_path: &Path) -> Result<()> {
    let integrity: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if integrity != "ok" {
        return Err(Error::format_invalid(
            db_path,
            format!("integrity check failed: {}", integrity),
        ));
    }

    let schema_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    debug!("Database schema version: {}", schema_version);
    Ok(())
}

/// Whether the store is locked, i.e. its browser is running.
///
/// Firefox and Chromium both hold a write lock while running,
/// so failing to start an IMMEDIATE transaction means the store is in use.
pub fn is_store_locked(db_path: &Path) -> bool {
    match Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_WRITE) {
        Ok(conn) => {
            if let Err(e) = conn.busy_timeout(Duration::from_millis(0)) {
                debug!("Failed to set busy timeout: {}", e);
                return true;
            }
            if let Err(e) = conn.execute_batch("BEGIN IMMEDIATE") {
                debug!("Failed to begin immediate transaction (db likely locked): {}", e);
                return true;
            }
            let _ = conn.execute_batch("ROLLBACK");
            false
        }
        Err(e) => {
            debug!("Failed to open database for locking check: {}", e);
            true
        }
    }
}

/// Open a store for writing once it exists, is unlocked and passes the integrity check.
pub fn open_for_write(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        return Err(Error::SourceMissing(db_path.to_path_buf()));
    }
    if is_store_locked(db_path) {
        return Err(Error::ProfileLocked(db_path.to_path_buf()));
    }

    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    check_integrity(&conn, db_path)?;
    Ok(conn)
}

/// Run `operation` inside one write transaction.
///
/// If the closure fails the transaction is dropped and rolled back, leaving the store as it was.
pub fn with_write_transaction<T, F>(db_path: &Path, operation: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    info!("🛡️  Starting database transaction for {:?}", db_path);

    let mut conn = open_for_write(db_path)?;
    let tx = conn.transaction()?;
    let value = operation(&tx)?;
    tx.commit()?;

    info!("✅ Transaction committed for {:?}", db_path);
    Ok(value)
}
