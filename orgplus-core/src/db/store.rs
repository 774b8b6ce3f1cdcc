//! SQLite store
//!
//! Owns the single connection to the organizational database. Components do
//! not hold their own handles: every operation goes through [`Store::read`]
//! or [`Store::write`], and `write` wraps the whole operation in one
//! `IMMEDIATE` transaction so existence checks and the writes that depend on
//! them are atomic.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{OrgError, Result};
use crate::models::{Attributes, Employee, OrgUnit};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// Default time a writer waits for another connection's lock
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) const UNIT_SELECT: &str = "SELECT u.*,
        (SELECT COUNT(*) FROM employees e WHERE e.unit_code = u.code AND e.deleted_at IS NULL)
            AS active_employees
     FROM units u";

pub(crate) const EMPLOYEE_SELECT: &str = "SELECT * FROM employees";

/// Handle to the organizational database
pub struct Store {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if needed) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens the database with an explicit busy timeout
    pub fn open_with_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| OrgError::io(parent, e))?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::init_schema(&conn)?;
        info!(path = %path.display(), "store ready");

        Ok(Self {
            path: Some(path),
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Returns the database file path, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the connection, reporting any error from SQLite
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.close().map_err(|(_, e)| OrgError::Storage(e))
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        // A missing or empty version table reads as version 0
        let has_version_table: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
            [],
            |row| row.get(0),
        )?;
        let current_version: i32 = if has_version_table {
            conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0)
        } else {
            0
        };

        if current_version == 0 {
            conn.execute_batch(include_str!("schema.sql"))?;
            debug!(version = SCHEMA_VERSION, "schema created");
        } else if current_version != SCHEMA_VERSION {
            return Err(OrgError::UnsupportedSchema {
                found: current_version,
                expected: SCHEMA_VERSION,
            });
        }

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic in another caller cannot leave a half-open transaction behind:
        // the transaction is rolled back when it is dropped during unwinding.
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs a read-only operation
    pub(crate) fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock();
        op(&conn)
    }

    /// Runs a mutation inside one transaction, committed only on success
    pub(crate) fn write<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Formats a timestamp the way it is stored: RFC 3339, UTC, milliseconds
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in storage format
pub(crate) fn now() -> String {
    format_timestamp(&Utc::now())
}

fn parse_timestamp(row: &Row<'_>, raw: &str, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            let idx = row.as_ref().column_index(column).unwrap_or_default();
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })
}

pub(crate) fn get_timestamp(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_timestamp(row, &raw, column)
}

pub(crate) fn get_opt_timestamp(
    row: &Row<'_>,
    column: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|s| parse_timestamp(row, &s, column)).transpose()
}

/// Maps a row of [`UNIT_SELECT`] to a unit
pub(crate) fn unit_from_row(row: &Row<'_>) -> rusqlite::Result<OrgUnit> {
    Ok(OrgUnit {
        id: row.get("id")?,
        code: row.get("code")?,
        parent_code: row.get("parent_code")?,
        description: row.get("description")?,
        cost_center: row.get("cost_center")?,
        attributes: Attributes::from_row(row)?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
        deleted_at: get_opt_timestamp(row, "deleted_at")?,
        active_employees: row.get("active_employees")?,
    })
}

/// Maps a row of [`EMPLOYEE_SELECT`] to an employee
pub(crate) fn employee_from_row(row: &Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: row.get("id")?,
        fiscal_code: row.get("fiscal_code")?,
        file_code: row.get("file_code")?,
        unit_code: row.get("unit_code")?,
        cost_center: row.get("cost_center")?,
        cost_center_numeric: row.get("cost_center_numeric")?,
        attributes: Attributes::from_row(row)?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
        deleted_at: get_opt_timestamp(row, "deleted_at")?,
    })
}

/// Loads a unit by code, whatever its deletion state
pub(crate) fn fetch_unit(conn: &Connection, code: &str) -> Result<Option<OrgUnit>> {
    let sql = format!("{} WHERE u.code = ?1", UNIT_SELECT);
    Ok(conn.query_row(&sql, [code], unit_from_row).optional()?)
}

/// Loads an employee by fiscal code, whatever its deletion state
pub(crate) fn fetch_employee(conn: &Connection, fiscal_code: &str) -> Result<Option<Employee>> {
    let sql = format!("{} WHERE fiscal_code = ?1", EMPLOYEE_SELECT);
    Ok(conn.query_row(&sql, [fiscal_code], employee_from_row).optional()?)
}

/// Counts rows matching a single-parameter query
pub(crate) fn count(conn: &Connection, sql: &str, param: &str) -> Result<u32> {
    Ok(conn.query_row(sql, [param], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("orgplus.db");
        let store = Store::open(&path).unwrap();

        assert_eq!(store.path(), Some(path.as_path()));
        let version: i32 = store
            .read(|conn| Ok(conn.query_row("SELECT version FROM schema_version", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        store.close().unwrap();

        // Reopening an initialised database keeps the single version row
        let store = Store::open(&path).unwrap();
        let rows: i32 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_schema_has_every_attribute_column() {
        let store = Store::open_in_memory().unwrap();
        for table in ["units", "employees"] {
            let columns: Vec<String> = store
                .read(|conn| {
                    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
                    let names = stmt
                        .query_map([], |row| row.get::<_, String>(1))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    Ok(names)
                })
                .unwrap();
            for column in Attributes::COLUMNS {
                assert!(columns.iter().any(|c| c == column), "{}.{} missing", table, column);
            }
        }
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orgplus.db");
        Store::open(&path).unwrap().close().unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE schema_version SET version = 99", []).unwrap();
        drop(conn);

        match Store::open(&path) {
            Err(OrgError::UnsupportedSchema { found, expected }) => {
                assert_eq!(found, 99);
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("expected UnsupportedSchema, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_unreadable_schema_version_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orgplus.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE schema_version (version TEXT NOT NULL);
             INSERT INTO schema_version (version) VALUES ('one');",
        )
        .unwrap();
        drop(conn);

        assert!(matches!(Store::open(&path), Err(OrgError::Storage(_))));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.write(|tx| {
            tx.execute(
                "INSERT INTO units (code, created_at, updated_at) VALUES ('X', ?1, ?1)",
                [now()],
            )?;
            Err(OrgError::ParentNotFound("nope".to_string()))
        });
        assert!(result.is_err());

        let found = store.read(|conn| fetch_unit(conn, "X")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(5);
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
        assert!(format_timestamp(&earlier).ends_with('Z'));
    }
}
