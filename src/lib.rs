// Roster Reconcile - Core Library
// Exposes all modules for use in the CLI, the HTTP trigger, and tests

pub mod error;
pub mod config;
pub mod db;             // Warehouse: schema, record types, scoped connection
pub mod parser;         // Record Parser
pub mod staging;        // Staging Buffer
pub mod audit;          // Audit Ledger
pub mod reconciliation; // Reconciliation Engine
pub mod object_store;
pub mod evidence;       // Evidence Exporter
pub mod alerting;
pub mod orchestrator;   // Run Orchestrator

// Re-export commonly used types
pub use error::{ReconcileError, Result};
pub use config::Config;
pub use db::{
    AuthoritativeRecord, CandidateRecord, EmployeeRecord, Warehouse,
    setup_database, get_all_employees, get_employee, count_employees,
};
pub use parser::parse_batch;
pub use audit::AuditEntry;
pub use reconciliation::{reconcile_batch, BatchSource, ReconciliationResult};
pub use object_store::{LocalObjectStore, MemoryObjectStore, ObjectStore};
pub use evidence::{EvidenceExporter, EvidenceKeys};
pub use alerting::{Alert, AlertChannel, LogAlertChannel, MemoryAlertChannel};
pub use orchestrator::{BatchReport, BatchState, Orchestrator, ProcessResult, RunOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
