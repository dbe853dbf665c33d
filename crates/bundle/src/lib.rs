//! Bundle model for gatepass.
//!
//! This crate defines everything the scanner reports and the planners
//! consume: bundle entries, per-binary inspection results, planned
//! actions with their replayable commands, the execution log, and the
//! check report.

pub mod action;
pub mod binary;
pub mod command;
pub mod entry;
pub mod log;
pub mod report;
pub mod scan;
pub mod schema;

pub use action::{ArchiveRepack, FixAction, FixKind, SignAction, SignStep};
pub use binary::{BinaryInfo, BuildVersion, SignatureStatus};
pub use command::Command;
pub use entry::{BundleEntry, EntryKind};
pub use log::{ActionOutcome, Disposition, ExecutionLog, LogEntry, RunSummary, SummaryRow};
pub use scan::{ArchiveStaging, ScannedBundle};
pub use report::{
    validate_report, CheckReport, EntryCensus, Finding, FindingCategory, ReportError, Severity,
    ValidationResult,
};
