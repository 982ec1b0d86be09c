// 🗄️ Warehouse - schema, record types and the scoped connection
//
// Three tables:
//   st_employees  staging buffer, one batch at a time
//   pr_employees  authoritative store, one row per employee_id
//   audit_log     append-only ledger, one row per reconciliation run
//
// Table and column names are static literals. Every data-bearing value is a
// bound parameter.

use crate::error::{ReconcileError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// RECORD TYPES
// ============================================================================

/// One employee row, as delivered in a batch file.
///
/// Field order matches the batch file column order:
/// `employee_id, name, role, shift_type, enter_date, salary`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub employee_id: String,
    pub name: String,
    pub role: String,
    pub shift_type: String,
    /// Integer-encoded date, e.g. 20230101
    pub enter_date: i64,
    pub salary: String,
}

/// A parsed row proposed for insertion/update. Lives only in the staging buffer.
pub type CandidateRecord = EmployeeRecord;

impl EmployeeRecord {
    pub fn new(
        employee_id: &str,
        name: &str,
        role: &str,
        shift_type: &str,
        enter_date: i64,
        salary: &str,
    ) -> Self {
        EmployeeRecord {
            employee_id: employee_id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            shift_type: shift_type.to_string(),
            enter_date,
            salary: salary.to_string(),
        }
    }

    /// Field-wise comparison of every non-key field.
    ///
    /// Each field is compared on its own, so a single differing field is
    /// enough to count as a change.
    pub fn differs_from(&self, other: &EmployeeRecord) -> bool {
        self.name != other.name
            || self.role != other.role
            || self.shift_type != other.shift_type
            || self.enter_date != other.enter_date
            || self.salary != other.salary
    }
}

/// The persisted counterpart of a candidate: same fields plus the change id
/// of the run that last touched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritativeRecord {
    #[serde(flatten)]
    pub employee: EmployeeRecord,
    pub change_id: i64,
}

impl AuthoritativeRecord {
    pub fn employee_id(&self) -> &str {
        &self.employee.employee_id
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Audit ledger (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log (
            change_id INTEGER PRIMARY KEY,
            inserted_count INTEGER NOT NULL,
            updated_count INTEGER NOT NULL,
            run_start TEXT NOT NULL,
            run_end TEXT NOT NULL,
            source_key TEXT NOT NULL,
            batch_sha256 TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS audit_log_no_update
         BEFORE UPDATE ON audit_log
         BEGIN
            SELECT RAISE(ABORT, 'audit_log is append-only');
         END",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
         BEFORE DELETE ON audit_log
         BEGIN
            SELECT RAISE(ABORT, 'audit_log is append-only');
         END",
        [],
    )?;

    // ==========================================================================
    // Staging buffer
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS st_employees (
            employee_id TEXT PRIMARY KEY,
            employee_name TEXT NOT NULL,
            role TEXT NOT NULL,
            shift_type TEXT NOT NULL,
            enter_date INTEGER NOT NULL,
            salary TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Authoritative store
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pr_employees (
            employee_id TEXT PRIMARY KEY,
            employee_name TEXT NOT NULL,
            role TEXT NOT NULL,
            shift_type TEXT NOT NULL,
            enter_date INTEGER NOT NULL,
            salary TEXT NOT NULL,
            change_id INTEGER NOT NULL
                REFERENCES audit_log(change_id) DEFERRABLE INITIALLY DEFERRED
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pr_employees_change_id ON pr_employees(change_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// SCOPED CONNECTION
// ============================================================================

/// The single warehouse connection of one invocation.
///
/// Acquired once by the orchestrator and lent to each component. Dropping it
/// closes the connection; an open batch transaction borrowed from it rolls
/// back when dropped.
pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            ReconcileError::TransportFailure(format!(
                "cannot open warehouse {}: {}",
                path.display(),
                e
            ))
        })?;
        setup_database(&conn).map_err(|e| {
            ReconcileError::TransportFailure(format!(
                "cannot prepare warehouse {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Warehouse { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ReconcileError::TransportFailure(e.to_string()))?;
        setup_database(&conn)?;
        Ok(Warehouse { conn })
    }

    /// Begin the batch transaction.
    ///
    /// IMMEDIATE takes the write lock up front, so the change-id read and the
    /// writes that use it cannot interleave with another writer.
    pub fn begin(&mut self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| ReconcileError::TransportFailure(e.to_string()))
    }
}

// ============================================================================
// QUERIES
// ============================================================================

fn authoritative_from_row(row: &Row<'_>) -> rusqlite::Result<AuthoritativeRecord> {
    Ok(AuthoritativeRecord {
        employee: EmployeeRecord {
            employee_id: row.get(0)?,
            name: row.get(1)?,
            role: row.get(2)?,
            shift_type: row.get(3)?,
            enter_date: row.get(4)?,
            salary: row.get(5)?,
        },
        change_id: row.get(6)?,
    })
}

pub fn get_all_employees(conn: &Connection) -> Result<Vec<AuthoritativeRecord>> {
    let mut stmt = conn.prepare(
        "SELECT employee_id, employee_name, role, shift_type, enter_date, salary, change_id
         FROM pr_employees
         ORDER BY employee_id",
    )?;

    let employees = stmt
        .query_map([], authoritative_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(employees)
}

pub fn get_employee(conn: &Connection, employee_id: &str) -> Result<Option<AuthoritativeRecord>> {
    let employee = conn
        .query_row(
            "SELECT employee_id, employee_name, role, shift_type, enter_date, salary, change_id
             FROM pr_employees
             WHERE employee_id = ?1",
            params![employee_id],
            authoritative_from_row,
        )
        .optional()?;

    Ok(employee)
}

pub fn count_employees(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM pr_employees", [], |row| row.get(0))?;

    Ok(count)
}
