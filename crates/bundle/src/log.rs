//! Execution log: the ordered record of every planned action.
//!
//! The log is the single source of truth for both the end-of-run
//! summary and the emitted script. Command presence is planning-time
//! data; outcomes are runtime data. The script reads only commands, so
//! dry-run and apply emit identical scripts.

use crate::command::Command;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to one action at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ActionOutcome {
    /// Applied in apply mode, or validated and recorded in dry-run.
    Applied,
    Skipped { reason: String },
    Failed { reason: String },
}

/// One (action, outcome) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique sequence number.
    pub seq: u64,
    pub at: DateTime<Utc>,
    /// Bundle-relative path of the entry acted on; empty for
    /// bundle-level steps.
    pub target: String,
    /// Human description of the action.
    pub action: String,
    /// The equivalent standalone command. `None` for evaluations that
    /// produced nothing to replay (already satisfied).
    pub command: Option<Command>,
    pub outcome: ActionOutcome,
}

/// Append-only log accumulated over one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    entries: Vec<LogEntry>,
    next_seq: u64,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            entries: Vec::new(),
            next_seq: 0,
        }
    }

    /// Append one entry, assigning the next sequence number.
    pub fn record(
        &mut self,
        target: impl Into<String>,
        action: impl Into<String>,
        command: Option<Command>,
        outcome: ActionOutcome,
    ) {
        self.entries.push(LogEntry {
            seq: self.next_seq,
            at: Utc::now(),
            target: target.into(),
            action: action.into(),
            command,
            outcome,
        });
        self.next_seq += 1;
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// The planning-time command sequence, in order. This is what the
    /// script emitter serializes, independent of outcomes.
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.entries.iter().filter_map(|e| e.command.as_ref())
    }

    pub fn failed(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, ActionOutcome::Failed { .. }))
    }
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-entry disposition for the end-of-run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "disposition")]
pub enum Disposition {
    /// All planned fixes applied and the entry was signed.
    FixedSigned,
    /// Fixes applied but signing did not run (fix-only invocation).
    FixedOnly,
    /// Signed; no fixes were needed.
    Signed,
    /// Nothing to do and nothing failed.
    Unchanged,
    /// Not signed because a dependency's fix or sign failed.
    SkippedDependency { reason: String },
    /// The entry's own action failed.
    Error { reason: String },
}

/// One row of the final summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub entry: String,
    #[serde(flatten)]
    pub disposition: Disposition,
}

/// The user-facing end-of-run summary, derived from the log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub rows: Vec<SummaryRow>,
}

impl RunSummary {
    pub fn push(&mut self, entry: impl Into<String>, disposition: Disposition) {
        self.rows.push(SummaryRow {
            entry: entry.into(),
            disposition,
        });
    }

    pub fn error_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r.disposition, Disposition::Error { .. }))
            .count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            let state = match &row.disposition {
                Disposition::FixedSigned => "fixed+signed".to_string(),
                Disposition::FixedOnly => "fixed".to_string(),
                Disposition::Signed => "signed".to_string(),
                Disposition::Unchanged => "unchanged".to_string(),
                Disposition::SkippedDependency { reason } => {
                    format!("skipped ({reason})")
                }
                Disposition::Error { reason } => format!("error ({reason})"),
            };
            writeln!(f, "{:<60} {}", row.entry, state)?;
        }
        Ok(())
    }
}
