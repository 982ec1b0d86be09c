// 🏗️ Record Parser - batch file bytes → candidate records
//
// Batch format: CSV, UTF-8, one header row, then rows of exactly six fields:
//   employee_id, name, role, shift_type, enter_date, salary
//
// All-or-nothing: the first bad row fails the whole batch.

use crate::db::CandidateRecord;
use crate::error::{ReconcileError, Result};
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashSet;

/// Number of fields every data row must carry
pub const FIELD_COUNT: usize = 6;

/// Decode one batch file into candidate records.
///
/// The first row is a header and is skipped without looking at it.
/// Fails with `MalformedBatch` when a row does not have exactly six fields,
/// when `enter_date` is not an integer, when the content is not UTF-8, or
/// when an `employee_id` repeats within the batch.
pub fn parse_batch(content: &[u8]) -> Result<Vec<CandidateRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content);

    let mut candidates = Vec::new();
    let mut seen_ids = HashSet::new();

    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);

        let candidate = parse_row(&record, line)?;

        if !seen_ids.insert(candidate.employee_id.clone()) {
            return Err(ReconcileError::malformed(
                line,
                format!("duplicate employee_id '{}' in batch", candidate.employee_id),
            ));
        }

        candidates.push(candidate);
    }

    Ok(candidates)
}

fn parse_row(record: &StringRecord, line: u64) -> Result<CandidateRecord> {
    if record.len() != FIELD_COUNT {
        return Err(ReconcileError::malformed(
            line,
            format!("expected {} fields, found {}", FIELD_COUNT, record.len()),
        ));
    }

    // Length checked above, indexing cannot go out of bounds
    let raw_date = &record[4];
    let enter_date = raw_date.trim().parse::<i64>().map_err(|_| {
        ReconcileError::malformed(
            line,
            format!("enter_date '{}' is not an integer", raw_date),
        )
    })?;

    Ok(CandidateRecord {
        employee_id: record[0].to_string(),
        name: record[1].to_string(),
        role: record[2].to_string(),
        shift_type: record[3].to_string(),
        enter_date,
        salary: record[5].to_string(),
    })
}
