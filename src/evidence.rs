// 🧾 Evidence Exporter - write-once CSV exports of what a run changed
//
// Two artifacts per batch, named by run timestamp and batch identity:
//   <insert_prefix>inserted_<YYYYmmddHHMMSS>_<batch name>
//   <update_prefix>updated_<YYYYmmddHHMMSS>_<batch name>
//
// The batch name is the key below the input prefix with '/' turned into '_',
// so project/east/roster.csv becomes east_roster.csv.
//
// Only call after the batch transaction committed.

use crate::db::AuthoritativeRecord;
use crate::error::{ReconcileError, Result};
use crate::object_store::ObjectStore;
use crate::reconciliation::ReconciliationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const EVIDENCE_HEADER: [&str; 7] = [
    "Employee_ID",
    "Employee_Name",
    "Role",
    "Shift_Type",
    "Enter_Date",
    "Salary",
    "Change_ID",
];

/// Keys of the two artifacts written for one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceKeys {
    pub inserted: String,
    pub updated: String,
}

pub struct EvidenceExporter<'a> {
    store: &'a dyn ObjectStore,
    input_prefix: &'a str,
    insert_prefix: &'a str,
    update_prefix: &'a str,
}

impl<'a> EvidenceExporter<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        input_prefix: &'a str,
        insert_prefix: &'a str,
        update_prefix: &'a str,
    ) -> Self {
        EvidenceExporter {
            store,
            input_prefix,
            insert_prefix,
            update_prefix,
        }
    }

    /// Artifact keys for a batch file, without writing anything
    pub fn keys_for(&self, run_timestamp: DateTime<Utc>, source_key: &str) -> EvidenceKeys {
        let stamp = run_timestamp.format("%Y%m%d%H%M%S");
        let name = self.batch_name(source_key);

        EvidenceKeys {
            inserted: format!("{}inserted_{}_{}", self.insert_prefix, stamp, name),
            updated: format!("{}updated_{}_{}", self.update_prefix, stamp, name),
        }
    }

    fn batch_name(&self, source_key: &str) -> String {
        source_key
            .strip_prefix(self.input_prefix)
            .unwrap_or(source_key)
            .trim_start_matches('/')
            .replace('/', "_")
    }

    /// Write both artifacts. Either key already existing is fatal.
    ///
    /// Both names are checked up front so a collision writes nothing; each
    /// write is still create-only in case another writer took the name since.
    pub fn export(
        &self,
        result: &ReconciliationResult,
        run_timestamp: DateTime<Utc>,
        source_key: &str,
    ) -> Result<EvidenceKeys> {
        let keys = self.keys_for(run_timestamp, source_key);

        // Check both names before writing either
        for key in [&keys.inserted, &keys.updated] {
            let taken = self
                .store
                .exists(key)
                .map_err(|e| ReconcileError::EvidenceWriteFailure(e.to_string()))?;
            if taken {
                return Err(ReconcileError::EvidenceWriteFailure(format!(
                    "artifact '{}' already exists",
                    key
                )));
            }
        }

        self.write_artifact(&keys.inserted, &result.inserted)?;
        self.write_artifact(&keys.updated, &result.updated)?;

        Ok(keys)
    }

    fn write_artifact(&self, key: &str, records: &[AuthoritativeRecord]) -> Result<()> {
        let bytes = to_csv(records)?;
        self.store
            .create(key, &bytes)
            .map_err(|e| ReconcileError::EvidenceWriteFailure(e.to_string()))
    }
}

/// Header row plus one row per record
pub fn to_csv(records: &[AuthoritativeRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let encode = |e: csv::Error| ReconcileError::EvidenceWriteFailure(e.to_string());

    writer.write_record(EVIDENCE_HEADER).map_err(encode)?;

    for record in records {
        let employee = &record.employee;
        let enter_date = employee.enter_date.to_string();
        let change_id = record.change_id.to_string();
        writer
            .write_record([
                employee.employee_id.as_str(),
                employee.name.as_str(),
                employee.role.as_str(),
                employee.shift_type.as_str(),
                enter_date.as_str(),
                employee.salary.as_str(),
                change_id.as_str(),
            ])
            .map_err(encode)?;
    }

    writer
        .into_inner()
        .map_err(|e| ReconcileError::EvidenceWriteFailure(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::EmployeeRecord;
    use crate::object_store::MemoryObjectStore;
    use chrono::TimeZone;

    fn result() -> ReconciliationResult {
        ReconciliationResult {
            change_id: 4,
            inserted: vec![AuthoritativeRecord {
                employee: EmployeeRecord::new("1", "Doe, Ann", "Eng", "Day", 20230101, "5000"),
                change_id: 4,
            }],
            updated: vec![],
            unchanged: 0,
        }
    }

    fn run_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    #[test]
    fn test_keys_use_timestamp_and_batch_name() {
        let store = MemoryObjectStore::new();
        let exporter = EvidenceExporter::new(&store, "project/", "inserts/", "updates/");

        let keys = exporter.keys_for(run_time(), "project/batch.csv");
        assert_eq!(keys.inserted, "inserts/inserted_20240506070809_batch.csv");
        assert_eq!(keys.updated, "updates/updated_20240506070809_batch.csv");

        let nested = exporter.keys_for(run_time(), "project/2024/batch.csv");
        assert_eq!(nested.inserted, "inserts/inserted_20240506070809_2024_batch.csv");
        assert_eq!(nested.updated, "updates/updated_20240506070809_2024_batch.csv");
    }

    #[test]
    fn test_same_file_name_in_different_folders_gets_distinct_keys() {
        let store = MemoryObjectStore::new();
        let exporter = EvidenceExporter::new(&store, "project/", "inserts/", "updates/");

        let east = exporter.export(&result(), run_time(), "project/east/roster.csv").unwrap();
        let west = exporter.export(&result(), run_time(), "project/west/roster.csv").unwrap();

        assert_ne!(east, west);
        assert_eq!(east.inserted, "inserts/inserted_20240506070809_east_roster.csv");
        assert_eq!(west.inserted, "inserts/inserted_20240506070809_west_roster.csv");
    }

    #[test]
    fn test_export_writes_header_and_rows() {
        let store = MemoryObjectStore::new();
        let exporter = EvidenceExporter::new(&store, "project/", "inserts/", "updates/");

        let keys = exporter.export(&result(), run_time(), "project/batch.csv").unwrap();

        let inserted = String::from_utf8(store.read(&keys.inserted).unwrap()).unwrap();
        assert_eq!(
            inserted,
            "Employee_ID,Employee_Name,Role,Shift_Type,Enter_Date,Salary,Change_ID\n\
             1,\"Doe, Ann\",Eng,Day,20230101,5000,4\n"
        );

        // Empty update-set still yields a header-only artifact
        let updated = String::from_utf8(store.read(&keys.updated).unwrap()).unwrap();
        assert_eq!(
            updated,
            "Employee_ID,Employee_Name,Role,Shift_Type,Enter_Date,Salary,Change_ID\n"
        );
    }

    #[test]
    fn test_name_collision_is_fatal_and_not_overwritten() {
        let store = MemoryObjectStore::new()
            .with_object("updates/updated_20240506070809_batch.csv", "original");
        let exporter = EvidenceExporter::new(&store, "project/", "inserts/", "updates/");

        let err = exporter
            .export(&result(), run_time(), "project/batch.csv")
            .unwrap_err();

        assert!(matches!(err, ReconcileError::EvidenceWriteFailure(_)));
        assert_eq!(
            store.read("updates/updated_20240506070809_batch.csv").unwrap(),
            b"original".to_vec()
        );
        assert!(!store
            .exists("inserts/inserted_20240506070809_batch.csv")
            .unwrap());
    }
}
