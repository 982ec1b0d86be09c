// ⚖️ Reconciliation Engine - staged candidates vs authoritative store
//
// Every staged candidate lands in exactly one bucket:
//   inserted   no authoritative row with that employee_id (anti-join)
//   updated    authoritative row exists and at least one field differs
//   unchanged  authoritative row exists and every field is equal
//
// Inserted and updated rows are stamped with one change id per run:
//   change_id = max(audit_log.change_id, 0) + 1
//
// Must run inside the batch transaction. reconcile_batch appends the run's
// ledger entry in the same transaction: pr_employees.change_id is a deferred
// foreign key into audit_log, so a commit without it fails.

use crate::audit::{self, AuditEntry};
use crate::db::{AuthoritativeRecord, CandidateRecord};
use crate::error::{ReconcileError, Result};
use crate::staging;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// Change id shared by every row this run touched
    pub change_id: i64,

    /// Snapshots of the rows as inserted, ordered by employee_id
    pub inserted: Vec<AuthoritativeRecord>,

    /// Snapshots of the rows after overwrite, ordered by employee_id
    pub updated: Vec<AuthoritativeRecord>,

    /// Candidates identical to their authoritative counterpart
    pub unchanged: usize,
}

impl ReconciliationResult {
    /// No row was written
    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty()
    }

    /// Candidates seen by this run, across all three buckets
    pub fn candidate_count(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.unchanged
    }

    pub fn audit_entry(
        &self,
        run_start: DateTime<Utc>,
        run_end: DateTime<Utc>,
        source_key: &str,
        batch_sha256: &str,
    ) -> AuditEntry {
        AuditEntry {
            change_id: self.change_id,
            inserted_count: self.inserted.len() as i64,
            updated_count: self.updated.len() as i64,
            run_start,
            run_end,
            source_key: source_key.to_string(),
            batch_sha256: batch_sha256.to_string(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "change_id {}: {} inserted, {} updated, {} unchanged",
            self.change_id,
            self.inserted.len(),
            self.updated.len(),
            self.unchanged
        )
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Origin of the staged batch, recorded in its ledger entry
#[derive(Debug, Clone)]
pub struct BatchSource<'a> {
    pub key: &'a str,
    pub sha256: &'a str,
    pub run_start: DateTime<Utc>,
}

/// Reconcile the staged batch and append its ledger entry.
pub fn reconcile_batch(conn: &Connection, source: &BatchSource<'_>) -> Result<ReconciliationResult> {
    let result = reconcile(conn)?;
    let entry = result.audit_entry(source.run_start, Utc::now(), source.key, source.sha256);
    audit::record(conn, &entry)?;
    Ok(result)
}

/// Classify the staged batch against the authoritative store and apply the
/// insert-set and update-set.
///
/// Both sets are selected before either write, so the update predicate never
/// sees rows this run just inserted. Each write must affect exactly as many
/// rows as its set holds; anything else is `ReconciliationFailed` and the
/// caller rolls back.
fn reconcile(conn: &Connection) -> Result<ReconciliationResult> {
    let change_id = audit::next_change_id(conn)?;
    let staged = staging::count(conn)? as usize;

    let new_rows = select_new(conn)?;
    let changed_rows = select_changed(conn)?;

    let written = insert_new(conn, change_id)?;
    expect_rows("insert", written, new_rows.len())?;

    let written = update_changed(conn, change_id)?;
    expect_rows("update", written, changed_rows.len())?;

    let touched = new_rows.len() + changed_rows.len();
    let unchanged = staged.checked_sub(touched).ok_or_else(|| {
        ReconcileError::ReconciliationFailed(format!(
            "{} rows touched but only {} staged",
            touched, staged
        ))
    })?;

    Ok(ReconciliationResult {
        change_id,
        inserted: stamp(new_rows, change_id),
        updated: stamp(changed_rows, change_id),
        unchanged,
    })
}

fn stamp(rows: Vec<CandidateRecord>, change_id: i64) -> Vec<AuthoritativeRecord> {
    rows.into_iter()
        .map(|employee| AuthoritativeRecord {
            employee,
            change_id,
        })
        .collect()
}

fn expect_rows(step: &str, written: usize, expected: usize) -> Result<()> {
    if written != expected {
        return Err(ReconcileError::ReconciliationFailed(format!(
            "{} affected {} rows, expected {}",
            step, written, expected
        )));
    }
    Ok(())
}

fn query_candidates(conn: &Connection, sql: &str) -> Result<Vec<CandidateRecord>> {
    let mut stmt = conn.prepare(sql)?;

    let rows = stmt
        .query_map([], |row| {
            Ok(CandidateRecord {
                employee_id: row.get(0)?,
                name: row.get(1)?,
                role: row.get(2)?,
                shift_type: row.get(3)?,
                enter_date: row.get(4)?,
                salary: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Insert-set: staged rows with no authoritative match
fn select_new(conn: &Connection) -> Result<Vec<CandidateRecord>> {
    query_candidates(
        conn,
        "SELECT s.employee_id, s.employee_name, s.role, s.shift_type, s.enter_date, s.salary
         FROM st_employees s
         LEFT JOIN pr_employees p ON s.employee_id = p.employee_id
         WHERE p.employee_id IS NULL
         ORDER BY s.employee_id",
    )
}

/// Update-set: staged rows whose authoritative match differs in any field
fn select_changed(conn: &Connection) -> Result<Vec<CandidateRecord>> {
    query_candidates(
        conn,
        "SELECT s.employee_id, s.employee_name, s.role, s.shift_type, s.enter_date, s.salary
         FROM st_employees s
         JOIN pr_employees p ON s.employee_id = p.employee_id
         WHERE s.employee_name != p.employee_name
            OR s.role != p.role
            OR s.shift_type != p.shift_type
            OR s.enter_date != p.enter_date
            OR s.salary != p.salary
         ORDER BY s.employee_id",
    )
}

fn insert_new(conn: &Connection, change_id: i64) -> Result<usize> {
    let written = conn.execute(
        "INSERT INTO pr_employees (
            employee_id, employee_name, role, shift_type, enter_date, salary, change_id
         )
         SELECT s.employee_id, s.employee_name, s.role, s.shift_type, s.enter_date, s.salary, ?1
         FROM st_employees s
         LEFT JOIN pr_employees p ON s.employee_id = p.employee_id
         WHERE p.employee_id IS NULL",
        params![change_id],
    )?;
    Ok(written)
}

fn update_changed(conn: &Connection, change_id: i64) -> Result<usize> {
    let written = conn.execute(
        "UPDATE pr_employees
         SET employee_name = s.employee_name,
             role = s.role,
             shift_type = s.shift_type,
             enter_date = s.enter_date,
             salary = s.salary,
             change_id = ?1
         FROM st_employees AS s
         WHERE pr_employees.employee_id = s.employee_id
           AND (s.employee_name != pr_employees.employee_name
                OR s.role != pr_employees.role
                OR s.shift_type != pr_employees.shift_type
                OR s.enter_date != pr_employees.enter_date
                OR s.salary != pr_employees.salary)",
        params![change_id],
    )?;
    Ok(written)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_all_employees, get_employee, setup_database, EmployeeRecord};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn source() -> BatchSource<'static> {
        BatchSource {
            key: "project/test.csv",
            sha256: "digest",
            run_start: Utc::now(),
        }
    }

    /// One full batch transaction: stage, reconcile and record, commit
    fn run_batch(conn: &mut Connection, batch: &[CandidateRecord]) -> ReconciliationResult {
        let tx = conn.transaction().unwrap();
        staging::clear(&tx).unwrap();
        staging::load(&tx, batch).unwrap();

        let result = reconcile_batch(&tx, &source()).unwrap();

        tx.commit().unwrap();
        result
    }

    fn ann(shift: &str) -> EmployeeRecord {
        EmployeeRecord::new("1", "Ann", "Eng", shift, 20230101, "5000")
    }

    #[test]
    fn test_insert_into_empty_store() {
        let mut conn = setup();

        let result = run_batch(&mut conn, &[ann("Day")]);

        assert_eq!(result.change_id, 1);
        assert_eq!(result.inserted.len(), 1);
        assert!(result.updated.is_empty());
        assert_eq!(result.unchanged, 0);

        let ledger = audit::entries(&conn).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].change_id, 1);
        assert_eq!(ledger[0].inserted_count, 1);
        assert_eq!(ledger[0].updated_count, 0);
        assert_eq!(ledger[0].source_key, "project/test.csv");
        assert_eq!(ledger[0].batch_sha256, "digest");
        assert!(ledger[0].run_start <= ledger[0].run_end);

        let stored = get_employee(&conn, "1").unwrap().unwrap();
        assert_eq!(stored.employee, ann("Day"));
        assert_eq!(stored.change_id, 1);
    }

    #[test]
    fn test_single_field_change_is_an_update() {
        let mut conn = setup();
        run_batch(&mut conn, &[ann("Day")]);

        let result = run_batch(&mut conn, &[ann("Night")]);

        assert!(result.inserted.is_empty());
        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].employee.shift_type, "Night");
        assert_eq!(result.updated[0].change_id, 2);

        let stored = get_employee(&conn, "1").unwrap().unwrap();
        assert_eq!(stored.employee.shift_type, "Night");
        assert_eq!(stored.change_id, 2);
    }

    #[test]
    fn test_every_field_is_compared() {
        let base = ann("Day");
        let variants = vec![
            EmployeeRecord { name: "Anne".into(), ..base.clone() },
            EmployeeRecord { role: "Mgr".into(), ..base.clone() },
            EmployeeRecord { shift_type: "Night".into(), ..base.clone() },
            EmployeeRecord { enter_date: 20230102, ..base.clone() },
            EmployeeRecord { salary: "5001".into(), ..base.clone() },
        ];

        for variant in variants {
            let mut conn = setup();
            run_batch(&mut conn, &[base.clone()]);

            let result = run_batch(&mut conn, &[variant.clone()]);
            assert_eq!(result.updated.len(), 1, "variant {:?} should update", variant);
            assert!(result.inserted.is_empty());
            assert!(base.differs_from(&variant));
        }
    }

    #[test]
    fn test_sql_predicate_agrees_with_differs_from() {
        let base = ann("Day");
        let candidates = vec![
            base.clone(),
            EmployeeRecord { salary: "5000.0".into(), ..base.clone() },
            EmployeeRecord { name: "ann".into(), ..base.clone() },
            EmployeeRecord { role: "Eng ".into(), ..base.clone() },
        ];

        for candidate in candidates {
            let mut conn = setup();
            run_batch(&mut conn, &[base.clone()]);

            let result = run_batch(&mut conn, &[candidate.clone()]);
            assert_eq!(
                result.updated.len() == 1,
                base.differs_from(&candidate),
                "engine and differs_from disagree on {:?}",
                candidate
            );
        }
    }

    #[test]
    fn test_second_run_is_a_noop() {
        let mut conn = setup();
        let batch = vec![
            ann("Day"),
            EmployeeRecord::new("2", "Bo", "Ops", "Night", 20230201, "4200"),
        ];

        let first = run_batch(&mut conn, &batch);
        let before = get_all_employees(&conn).unwrap();

        let second = run_batch(&mut conn, &batch);

        assert_eq!(first.inserted.len(), 2);
        assert!(second.is_noop());
        assert_eq!(second.unchanged, 2);
        // Untouched rows keep the change id of the run that wrote them
        assert_eq!(get_all_employees(&conn).unwrap(), before);
    }

    #[test]
    fn test_partition_is_disjoint_and_exhaustive() {
        let mut conn = setup();
        run_batch(
            &mut conn,
            &[
                EmployeeRecord::new("1", "Ann", "Eng", "Day", 20230101, "5000"),
                EmployeeRecord::new("2", "Bo", "Ops", "Night", 20230201, "4200"),
            ],
        );

        let batch = vec![
            EmployeeRecord::new("1", "Ann", "Eng", "Day", 20230101, "5000"), // unchanged
            EmployeeRecord::new("2", "Bo", "Ops", "Day", 20230201, "4200"),  // updated
            EmployeeRecord::new("3", "Cy", "QA", "Day", 20230301, "3900"),   // inserted
            EmployeeRecord::new("4", "Di", "QA", "Night", 20230401, "3900"), // inserted
        ];
        let result = run_batch(&mut conn, &batch);

        assert_eq!(result.candidate_count(), batch.len());

        let inserted: Vec<&str> = result.inserted.iter().map(|r| r.employee_id()).collect();
        let updated: Vec<&str> = result.updated.iter().map(|r| r.employee_id()).collect();
        assert_eq!(inserted, vec!["3", "4"]);
        assert_eq!(updated, vec!["2"]);
        assert_eq!(result.unchanged, 1);
    }

    #[test]
    fn test_change_id_shared_and_monotonic() {
        let mut conn = setup();
        run_batch(&mut conn, &[ann("Day")]);
        run_batch(&mut conn, &[ann("Day")]); // no-op run still takes an id

        let result = run_batch(
            &mut conn,
            &[
                ann("Night"),
                EmployeeRecord::new("9", "Ed", "Ops", "Day", 20230901, "3000"),
            ],
        );

        assert_eq!(result.change_id, 3);
        assert!(result
            .inserted
            .iter()
            .chain(result.updated.iter())
            .all(|r| r.change_id == 3));

        let stored: Vec<i64> = get_all_employees(&conn)
            .unwrap()
            .iter()
            .map(|r| r.change_id)
            .collect();
        assert_eq!(stored, vec![3, 3]);
    }

    #[test]
    fn test_order_does_not_change_final_state() {
        let forward = vec![
            ann("Night"),
            EmployeeRecord::new("2", "Bo", "Ops", "Night", 20230201, "4200"),
            EmployeeRecord::new("3", "Cy", "QA", "Day", 20230301, "3900"),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let mut a = setup();
        run_batch(&mut a, &[ann("Day")]);
        let result_a = run_batch(&mut a, &forward);

        let mut b = setup();
        run_batch(&mut b, &[ann("Day")]);
        let result_b = run_batch(&mut b, &reversed);

        assert_eq!(result_a, result_b);
        assert_eq!(get_all_employees(&a).unwrap(), get_all_employees(&b).unwrap());
    }

    #[test]
    fn test_commit_without_ledger_entry_is_refused() {
        let mut conn = setup();

        {
            let tx = conn.transaction().unwrap();
            staging::load(&tx, &[ann("Day")]).unwrap();
            reconcile(&tx).unwrap();
            // No audit::record → deferred foreign key fails at commit
            assert!(tx.commit().is_err());
        }

        assert!(get_all_employees(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_rollback_leaves_store_unchanged() {
        let mut conn = setup();
        run_batch(&mut conn, &[ann("Day")]);
        let before = get_all_employees(&conn).unwrap();

        {
            let tx = conn.transaction().unwrap();
            staging::clear(&tx).unwrap();
            staging::load(&tx, &[ann("Night")]).unwrap();
            let result = reconcile(&tx).unwrap();
            assert_eq!(result.updated.len(), 1);
            tx.rollback().unwrap();
        }

        assert_eq!(get_all_employees(&conn).unwrap(), before);
        assert_eq!(audit::entries(&conn).unwrap().len(), 1);
    }
}
