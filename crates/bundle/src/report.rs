//! Check report: structured findings from the read-only pass.

use crate::entry::EntryKind;
use crate::schema;
use chrono::{DateTime, Utc};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a finding blocks Gatekeeper/notarization acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocking,
    Advisory,
}

/// What kind of problem a finding describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    UnresolvedReference,
    ExternalRpath,
    RpathNeedsRewrite,
    LoadPathNeedsRewrite,
    LibraryIdNeedsRewrite,
    LibraryNotInBundle,
    MissingSignature,
    InvalidSignature,
    BuildVersionIncomplete,
    BuildVersionTooOld,
    NestedArchive,
    ExternalSymlink,
    ImmutableEntry,
}

/// One problem found in one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Bundle-relative path of the affected entry.
    pub entry: String,
    pub category: FindingCategory,
    pub severity: Severity,
    pub details: String,
    /// Whether the fix planner can repair this automatically.
    pub fixable: bool,
}

/// Census row: one scanned entry and its basic facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryCensus {
    pub path: String,
    pub kind: EntryKind,
    pub archs: Vec<String>,
    pub signed: bool,
}

/// Output of `gatepass check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub schema_version: String,
    pub run_id: String,
    pub bundle_root: String,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<EntryCensus>,
    pub findings: Vec<Finding>,
}

impl CheckReport {
    pub fn new(bundle_root: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            schema_version: "1.0.0".to_string(),
            run_id: run_id.into(),
            bundle_root: bundle_root.into(),
            generated_at: Utc::now(),
            entries: Vec::new(),
            findings: Vec::new(),
        }
    }

    pub fn blocking(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Blocking)
    }

    pub fn has_blocking(&self) -> bool {
        self.blocking().next().is_some()
    }

    pub fn fixable_count(&self) -> usize {
        self.findings.iter().filter(|f| f.fixable).count()
    }
}

/// Report validation error type.
#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error("Schema compile error: {0}")]
    SchemaCompile(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),
}

/// Result of validating a serialized report.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ReportError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a serialized report against the embedded JSON schema.
///
/// Reports cross a tool boundary (CI gates consume them), so the shape
/// is validated before it is written.
pub fn validate_report(report: &Value) -> Result<ValidationResult, ReportError> {
    let schema_value: Value =
        serde_json::from_str(schema::REPORT_SCHEMA).expect("embedded schema is valid JSON");
    let compiled = JSONSchema::compile(&schema_value)
        .map_err(|e| ReportError::SchemaCompile(e.to_string()))?;

    let mut result = ValidationResult::default();
    if let Err(errors) = compiled.validate(report) {
        for error in errors {
            result.errors.push(ReportError::SchemaViolation(format!(
                "{} at {}",
                error, error.instance_path
            )));
        }
    }
    Ok(result)
}
