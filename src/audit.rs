// 📜 Audit Ledger - one append-only row per reconciliation run
//
// The change id handed out by `next_change_id` is shared by every
// authoritative row a run touches. Read it and write with it inside the same
// transaction.

use crate::error::{ReconcileError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub change_id: i64,
    pub inserted_count: i64,
    pub updated_count: i64,
    pub run_start: DateTime<Utc>,
    pub run_end: DateTime<Utc>,
    /// Object store key of the batch file this run reconciled
    pub source_key: String,
    /// Hex SHA-256 of the raw batch bytes
    pub batch_sha256: String,
}

/// `max(existing change_id, 0) + 1`
pub fn next_change_id(conn: &Connection) -> Result<i64> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(change_id), 0) + 1 FROM audit_log",
        [],
        |row| row.get(0),
    )?;
    Ok(next)
}

/// Append one entry. Never touches prior entries.
pub fn record(conn: &Connection, entry: &AuditEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_log (
            change_id, inserted_count, updated_count, run_start, run_end, source_key, batch_sha256
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.change_id,
            entry.inserted_count,
            entry.updated_count,
            entry.run_start.to_rfc3339(),
            entry.run_end.to_rfc3339(),
            entry.source_key,
            entry.batch_sha256,
        ],
    )?;

    Ok(())
}

/// All entries, oldest first
pub fn entries(conn: &Connection) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT change_id, inserted_count, updated_count, run_start, run_end, source_key, batch_sha256
         FROM audit_log
         ORDER BY change_id",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(change_id, inserted_count, updated_count, start, end, source_key, batch_sha256)| {
                Ok(AuditEntry {
                    change_id,
                    inserted_count,
                    updated_count,
                    run_start: parse_timestamp(&start)?,
                    run_end: parse_timestamp(&end)?,
                    source_key,
                    batch_sha256,
                })
            },
        )
        .collect()
}

/// Has a batch with this digest already been reconciled?
pub fn digest_seen(conn: &Connection, batch_sha256: &str) -> Result<Option<i64>> {
    let mut stmt = conn.prepare(
        "SELECT change_id FROM audit_log WHERE batch_sha256 = ?1 ORDER BY change_id DESC LIMIT 1",
    )?;
    let mut rows = stmt.query(params![batch_sha256])?;

    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ReconcileError::ReconciliationFailed(format!(
                "audit_log holds invalid timestamp '{}': {}",
                raw, e
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn entry(change_id: i64, inserted: i64, updated: i64) -> AuditEntry {
        let now = Utc::now();
        AuditEntry {
            change_id,
            inserted_count: inserted,
            updated_count: updated,
            run_start: now,
            run_end: now,
            source_key: format!("project/batch_{}.csv", change_id),
            batch_sha256: format!("digest-{}", change_id),
        }
    }

    #[test]
    fn test_next_change_id_starts_at_one() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert_eq!(next_change_id(&conn).unwrap(), 1);
    }

    #[test]
    fn test_next_change_id_follows_max() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        record(&conn, &entry(1, 3, 0)).unwrap();
        record(&conn, &entry(2, 0, 1)).unwrap();

        assert_eq!(next_change_id(&conn).unwrap(), 3);
    }

    #[test]
    fn test_entries_round_trip_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let first = entry(1, 1, 0);
        let second = entry(2, 0, 2);
        record(&conn, &second).unwrap();
        record(&conn, &first).unwrap();

        let all = entries(&conn).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].change_id, 1);
        assert_eq!(all[1].updated_count, 2);
        assert_eq!(all[0].run_start.timestamp(), first.run_start.timestamp());
    }

    #[test]
    fn test_duplicate_change_id_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        record(&conn, &entry(1, 1, 0)).unwrap();
        assert!(record(&conn, &entry(1, 0, 0)).is_err());
        assert_eq!(entries(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_digest_seen() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert_eq!(digest_seen(&conn, "digest-1").unwrap(), None);
        record(&conn, &entry(1, 1, 0)).unwrap();
        assert_eq!(digest_seen(&conn, "digest-1").unwrap(), Some(1));
    }
}
