// 🎛️ Run Orchestrator - one invocation, every pending batch file, in order
//
// Per batch file:
//   pending --parse/stage--> staged --reconcile--> reconciled --export+archive--> archived
//
// Any failure marks the batch failed, rolls back the open transaction (the
// rusqlite Transaction rolls back on drop), raises one alert and stops the
// invocation. Later batch files stay pending for the next invocation.

use crate::alerting::AlertChannel;
use crate::audit;
use crate::config::Config;
use crate::db::Warehouse;
use crate::error::Result;
use crate::evidence::{EvidenceExporter, EvidenceKeys};
use crate::object_store::ObjectStore;
use crate::parser::parse_batch;
use crate::reconciliation::{reconcile_batch, BatchSource, ReconciliationResult};
use crate::staging;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

pub const STATUS_OK: u16 = 200;
pub const STATUS_FAILED: u16 = 500;

// ============================================================================
// RUN OUTPUT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    Staged,
    Reconciled,
    Archived,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub key: String,
    pub state: BatchState,
    pub change_id: Option<i64>,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub evidence: Option<EvidenceKeys>,
    pub archive_key: Option<String>,
    pub error: Option<String>,
}

impl BatchReport {
    fn pending(key: &str) -> Self {
        BatchReport {
            key: key.to_string(),
            state: BatchState::Pending,
            change_id: None,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            evidence: None,
            archive_key: None,
            error: None,
        }
    }

    fn record_counts(&mut self, result: &ReconciliationResult) {
        self.change_id = Some(result.change_id);
        self.inserted = result.inserted.len();
        self.updated = result.updated.len();
        self.unchanged = result.unchanged;
    }

    fn advance(&mut self, state: BatchState) {
        debug!(key = %self.key, from = ?self.state, to = ?state, "batch state");
        self.state = state;
    }
}

/// The outward contract of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub status_code: u16,
    pub body: String,
    pub run_id: String,
    pub dry_run: bool,
    pub batches: Vec<BatchReport>,
}

impl ProcessResult {
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Reconcile inside the transaction, then roll back. No evidence, no archival.
    pub dry_run: bool,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct Orchestrator<'a> {
    config: &'a Config,
    store: &'a dyn ObjectStore,
    alerts: &'a dyn AlertChannel,
    options: RunOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a Config, store: &'a dyn ObjectStore, alerts: &'a dyn AlertChannel) -> Self {
        Orchestrator {
            config,
            store,
            alerts,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one invocation. Failures come back as status 500 after the alert
    /// has been sent.
    pub fn run(&self) -> ProcessResult {
        self.run_at(Utc::now())
    }

    /// Same as `run`, with an explicit run timestamp for evidence names
    pub fn run_at(&self, run_timestamp: DateTime<Utc>) -> ProcessResult {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("reconcile_run", run_id = %run_id, dry_run = self.options.dry_run);
        let _guard = span.enter();

        let mut batches = Vec::new();

        let (status_code, body) = match self.process_all(run_timestamp, &mut batches) {
            Ok(0) => {
                info!("no batch files found");
                (STATUS_OK, "No CSV files found.".to_string())
            }
            Ok(count) if self.options.dry_run => {
                info!(batches = count, "dry run complete, nothing committed");
                (
                    STATUS_OK,
                    format!("Dry run: {} CSV file(s) reconciled and rolled back.", count),
                )
            }
            Ok(count) => {
                info!(batches = count, "run complete");
                (
                    STATUS_OK,
                    "CSV files processed and warehouse updated.".to_string(),
                )
            }
            Err(err) => {
                let message = format!("Error: {}", err);
                error!(kind = err.kind(), error = %err, "run failed, halting");
                self.alerts.notify(&self.config.alerts.subject, &message);
                (STATUS_FAILED, message)
            }
        };

        ProcessResult {
            status_code,
            body,
            run_id,
            dry_run: self.options.dry_run,
            batches,
        }
    }

    /// Batch file keys under the input prefix, in key order
    pub fn discover(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .store
            .list(&self.config.store.input_prefix)?
            .into_iter()
            .filter(|key| key.ends_with(".csv"))
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub fn archive_key_for(&self, key: &str) -> String {
        let store = &self.config.store;
        let rest = key.strip_prefix(store.input_prefix.as_str()).unwrap_or(key);
        format!("{}{}", store.archive_prefix, rest)
    }

    fn process_all(&self, run_timestamp: DateTime<Utc>, batches: &mut Vec<BatchReport>) -> Result<usize> {
        let keys = self.discover()?;
        if keys.is_empty() {
            return Ok(0);
        }
        info!(count = keys.len(), "discovered batch files");

        // One connection for the whole invocation; dropped (closed) on any early return
        let mut warehouse = Warehouse::open(&self.config.warehouse.path)?;

        for key in &keys {
            let mut report = BatchReport::pending(key);
            let outcome = self.process_batch(&mut warehouse, key, run_timestamp, &mut report);

            if let Err(err) = &outcome {
                warn!(key = %key, state = ?report.state, error = %err, "batch failed, transaction rolled back");
                report.advance(BatchState::Failed);
                report.error = Some(err.to_string());
            }

            batches.push(report);
            outcome?;
        }

        warehouse.close()?;
        Ok(keys.len())
    }

    fn process_batch(
        &self,
        warehouse: &mut Warehouse,
        key: &str,
        run_timestamp: DateTime<Utc>,
        report: &mut BatchReport,
    ) -> Result<()> {
        info!(key = %key, "processing batch file");

        let content = self.store.read(key)?;
        let digest = sha256_hex(&content);
        let candidates = parse_batch(&content)?;

        if let Some(change_id) = audit::digest_seen(warehouse.connection(), &digest)? {
            warn!(
                key = %key,
                previous_change_id = change_id,
                "identical batch content was already reconciled; expecting a no-op"
            );
        }

        let run_start = Utc::now();
        let tx = warehouse.begin()?;

        staging::clear(&tx)?;
        let staged = staging::load(&tx, &candidates)?;
        report.advance(BatchState::Staged);
        debug!(key = %key, staged, "staging buffer loaded");

        let source = BatchSource {
            key,
            sha256: &digest,
            run_start,
        };
        let result = reconcile_batch(&tx, &source)?;
        report.record_counts(&result);

        if self.options.dry_run {
            tx.rollback()?;
            info!(key = %key, summary = %result.summary(), "dry run, rolled back");
            return Ok(());
        }

        tx.commit()?;
        report.advance(BatchState::Reconciled);
        info!(key = %key, summary = %result.summary(), "reconciliation committed");

        let exporter = EvidenceExporter::new(
            self.store,
            &self.config.store.input_prefix,
            &self.config.store.insert_prefix,
            &self.config.store.update_prefix,
        );
        let evidence = exporter.export(&result, run_timestamp, key)?;
        info!(inserted = %evidence.inserted, updated = %evidence.updated, "evidence written");
        report.evidence = Some(evidence);

        let archive_key = self.archive_key_for(key);
        self.store.copy(key, &archive_key)?;
        self.store.delete(key)?;
        report.archive_key = Some(archive_key.clone());
        report.advance(BatchState::Archived);
        info!(key = %key, archive_key = %archive_key, "batch file archived");

        let cleared = staging::clear(warehouse.connection())?;
        debug!(cleared, "staging buffer cleared");

        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
