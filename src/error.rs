// 🚨 Error Taxonomy - every terminal failure of a reconciliation invocation
//
// One variant per failure class. The orchestrator reports any of them through
// the alerting channel exactly once, then halts.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Batch content could not be decoded. Unrecoverable for that file.
    #[error("malformed batch at line {line}: {reason}")]
    MalformedBatch { line: u64, reason: String },

    /// A transactional step failed. The authoritative store is unchanged.
    #[error("reconciliation failed: {0}")]
    ReconciliationFailed(String),

    /// Object store or warehouse connectivity.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Evidence artifact could not be written after commit.
    /// The committed reconciliation stands.
    #[error("evidence write failure: {0}")]
    EvidenceWriteFailure(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ReconcileError {
    pub fn malformed(line: u64, reason: impl Into<String>) -> Self {
        ReconcileError::MalformedBatch {
            line,
            reason: reason.into(),
        }
    }

    /// Short machine-friendly name, used in logs and batch reports
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::MalformedBatch { .. } => "MalformedBatch",
            ReconcileError::ReconciliationFailed(_) => "ReconciliationFailed",
            ReconcileError::TransportFailure(_) => "TransportFailure",
            ReconcileError::EvidenceWriteFailure(_) => "EvidenceWriteFailure",
            ReconcileError::Config(_) => "Config",
        }
    }
}

impl From<rusqlite::Error> for ReconcileError {
    fn from(err: rusqlite::Error) -> Self {
        ReconcileError::ReconciliationFailed(err.to_string())
    }
}

impl From<csv::Error> for ReconcileError {
    fn from(err: csv::Error) -> Self {
        let line = err
            .position()
            .map(|pos| pos.line())
            .unwrap_or(0);
        ReconcileError::MalformedBatch {
            line,
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
