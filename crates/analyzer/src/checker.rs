//! Read-only analysis: report problems without planning mutations.

use crate::fix::{plan_fixes, EvalStatus, FixRules, Rule};
use crate::graph::build_graph;
use crate::resolve::ExemptionTable;
use gatepass_bundle::{
    CheckReport, EntryCensus, EntryKind, Finding, FindingCategory, FixKind, ScannedBundle,
    Severity, SignatureStatus,
};
use tracing::info;

/// Configuration for one check run.
#[derive(Debug, Clone, Default)]
pub struct CheckConfig {
    pub exemptions: ExemptionTable,
    /// Rule set evaluated read-only; `delete_external_rpaths` controls
    /// whether external rpaths are reported as fixable.
    pub rules: FixRules,
}

/// Run the read-only rule evaluation and produce a structured report.
pub fn run_check(scan: &ScannedBundle, config: &CheckConfig, run_id: &str) -> CheckReport {
    let mut report = CheckReport::new(scan.root.display().to_string(), run_id);

    for entry in &scan.entries {
        if entry.kind == EntryKind::Other {
            continue;
        }
        let signed = scan
            .binaries
            .get(&entry.rel_path)
            .map(|info| info.signature == SignatureStatus::Valid)
            .unwrap_or(false);
        report.entries.push(EntryCensus {
            path: entry.rel_path.clone(),
            kind: entry.kind,
            archs: entry.archs.clone(),
            signed,
        });
    }

    let build = build_graph(scan, &config.exemptions);
    for unresolved in &build.unresolved {
        report.findings.push(Finding {
            entry: unresolved.entry.clone(),
            category: FindingCategory::UnresolvedReference,
            severity: Severity::Blocking,
            details: format!(
                "load reference {} cannot be resolved with the declared rpath list",
                unresolved.reference
            ),
            fixable: false,
        });
    }

    for eval in plan_fixes(scan, &config.exemptions, &config.rules) {
        let finding = match eval.status {
            EvalStatus::Satisfied => None,
            EvalStatus::Planned(action) => {
                let category = match (&eval.rule, &action.kind) {
                    (Rule::LibraryId, _) => FindingCategory::LibraryIdNeedsRewrite,
                    (Rule::LoadPath, _) => FindingCategory::LoadPathNeedsRewrite,
                    (Rule::Rpath, FixKind::DeleteRpath { .. }) => FindingCategory::ExternalRpath,
                    (Rule::Rpath, _) => FindingCategory::RpathNeedsRewrite,
                    (Rule::BuildVersion, _) => FindingCategory::BuildVersionIncomplete,
                };
                Some(Finding {
                    entry: eval.target,
                    category,
                    severity: severity_of(category),
                    details: action.describe(),
                    fixable: true,
                })
            }
            EvalStatus::Rejected { reason } => Some(Finding {
                entry: eval.target,
                category: FindingCategory::ExternalRpath,
                severity: Severity::Blocking,
                details: reason,
                fixable: false,
            }),
            EvalStatus::Unfixable { category, details } => Some(Finding {
                entry: eval.target,
                category,
                severity: severity_of(category),
                details,
                fixable: false,
            }),
        };
        if let Some(finding) = finding {
            report.findings.push(finding);
        }
    }

    for (entry, info) in scan.machos() {
        match info.signature {
            SignatureStatus::Valid => {}
            SignatureStatus::Unsigned => report.findings.push(Finding {
                entry: entry.rel_path.clone(),
                category: FindingCategory::MissingSignature,
                severity: Severity::Blocking,
                details: "code object is not signed".to_string(),
                fixable: false,
            }),
            SignatureStatus::Invalid => report.findings.push(Finding {
                entry: entry.rel_path.clone(),
                category: FindingCategory::InvalidSignature,
                severity: Severity::Blocking,
                details: "signature does not verify".to_string(),
                fixable: false,
            }),
        }
    }

    for archive in &scan.archives {
        for nested in &archive.nested {
            report.findings.push(Finding {
                entry: archive.rel_path.clone(),
                category: FindingCategory::NestedArchive,
                severity: Severity::Advisory,
                details: format!("nested archive {nested} was not descended into"),
                fixable: false,
            });
        }
    }

    for link in &scan.external_symlinks {
        report.findings.push(Finding {
            entry: link.clone(),
            category: FindingCategory::ExternalSymlink,
            severity: Severity::Advisory,
            details: "symlink target resolves outside the bundle".to_string(),
            fixable: false,
        });
    }

    info!(
        findings = report.findings.len(),
        blocking = report.blocking().count(),
        "check complete"
    );
    report
}

fn severity_of(category: FindingCategory) -> Severity {
    match category {
        FindingCategory::BuildVersionIncomplete
        | FindingCategory::NestedArchive
        | FindingCategory::ExternalSymlink => Severity::Advisory,
        _ => Severity::Blocking,
    }
}
