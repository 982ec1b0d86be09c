// 📥 Staging Buffer - holds exactly one batch inside the warehouse
//
// Called with the batch transaction, so a failed load is rolled back together
// with everything else and never becomes visible to the engine.

use crate::db::CandidateRecord;
use crate::error::Result;
use rusqlite::{params, Connection};

/// Insert every candidate. The first failing insert aborts the load.
pub fn load(conn: &Connection, candidates: &[CandidateRecord]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO st_employees (
            employee_id, employee_name, role, shift_type, enter_date, salary
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    for candidate in candidates {
        stmt.execute(params![
            candidate.employee_id,
            candidate.name,
            candidate.role,
            candidate.shift_type,
            candidate.enter_date,
            candidate.salary,
        ])?;
    }

    Ok(candidates.len())
}

/// Empty the buffer unconditionally.
pub fn clear(conn: &Connection) -> Result<usize> {
    // SQLite has no TRUNCATE; an unqualified DELETE uses the truncate optimization
    let removed = conn.execute("DELETE FROM st_employees", [])?;
    Ok(removed)
}

pub fn count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM st_employees", [], |row| row.get(0))?;
    Ok(count)
}
