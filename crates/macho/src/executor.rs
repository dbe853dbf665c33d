//! Action execution in apply and dry-run modes.
//!
//! One code path serves both modes: every planned action's command is
//! recorded in the log first, and only apply mode actually spawns it.
//! Runtime failures change outcomes, never the recorded commands, so
//! the emitted script is identical either way.

use crate::runner;
use gatepass_analyzer::{DependencyGraph, EvalStatus, Evaluation, SignPlan};
use gatepass_bundle::{
    ActionOutcome, ArchiveRepack, Command, Disposition, EntryKind, ExecutionLog, FixAction,
    RunSummary, ScannedBundle, SignAction, SignStep,
};
use gatepass_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Apply,
    DryRun,
}

impl ExecutionMode {
    pub fn is_apply(self) -> bool {
        matches!(self, ExecutionMode::Apply)
    }
}

/// Applies planned actions (or validates them in dry-run) and keeps the
/// execution log as the single record of what happened.
pub struct ActionExecutor {
    mode: ExecutionMode,
    log: ExecutionLog,
    /// Backup space for copy-then-restore mutations; apply mode only.
    backups: Option<tempfile::TempDir>,
    fixed: HashSet<String>,
    signed: HashSet<String>,
    /// Entries whose own action failed, with the reason. A fix failure
    /// poisons the entry for the rest of the run.
    failures: HashMap<String, String>,
    /// Entries skipped because something they depend on failed.
    blocked: HashMap<String, String>,
    /// Entries with unfixable issues; surfaced in the summary without
    /// poisoning signing.
    reported: HashMap<String, String>,
}

impl ActionExecutor {
    pub fn new(mode: ExecutionMode) -> Result<Self> {
        let backups = match mode {
            ExecutionMode::Apply => Some(tempfile::TempDir::new()?),
            ExecutionMode::DryRun => None,
        };
        Ok(Self {
            mode,
            log: ExecutionLog::new(),
            backups,
            fixed: HashSet::new(),
            signed: HashSet::new(),
            failures: HashMap::new(),
            blocked: HashMap::new(),
            reported: HashMap::new(),
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    pub fn into_log(self) -> ExecutionLog {
        self.log
    }

    /// Execute a fix plan: planned actions run (or validate), satisfied
    /// rules log as skips, rejections and unfixable issues are
    /// recorded.
    pub fn run_fixes(&mut self, evaluations: &[Evaluation]) {
        for eval in evaluations {
            match &eval.status {
                EvalStatus::Satisfied => self.log.record(
                    &eval.target,
                    format!("{}: nothing to do", eval.rule.name()),
                    None,
                    ActionOutcome::Skipped {
                        reason: "already satisfied".to_string(),
                    },
                ),
                EvalStatus::Rejected { reason } => {
                    warn!(entry = %eval.target, reason = %reason, "fix rejected");
                    self.log.record(
                        &eval.target,
                        format!("{}: fix rejected", eval.rule.name()),
                        None,
                        ActionOutcome::Skipped {
                            reason: reason.clone(),
                        },
                    );
                }
                EvalStatus::Unfixable { details, .. } => {
                    warn!(entry = %eval.target, details = %details, "unfixable issue");
                    self.reported
                        .entry(eval.target.clone())
                        .or_insert_with(|| details.clone());
                    self.log.record(
                        &eval.target,
                        format!("{}: unfixable", eval.rule.name()),
                        None,
                        ActionOutcome::Failed {
                            reason: details.clone(),
                        },
                    );
                }
                EvalStatus::Planned(action) => self.apply_fix(action),
            }
        }
    }

    fn apply_fix(&mut self, action: &FixAction) {
        let command = action.command();
        let describe = action.describe();
        if !self.mode.is_apply() {
            let outcome = if action.target_path.exists() {
                self.fixed.insert(action.target.clone());
                ActionOutcome::Applied
            } else {
                ActionOutcome::Failed {
                    reason: "target does not exist".to_string(),
                }
            };
            self.log
                .record(&action.target, describe, Some(command), outcome);
            return;
        }

        match self.mutate(&action.target_path, &command) {
            Ok(()) => {
                self.fixed.insert(action.target.clone());
                self.log
                    .record(&action.target, describe, Some(command), ActionOutcome::Applied);
            }
            Err(e) => {
                let reason = e.to_string();
                self.failures
                    .entry(action.target.clone())
                    .or_insert_with(|| reason.clone());
                self.log.record(
                    &action.target,
                    describe,
                    Some(command),
                    ActionOutcome::Failed { reason },
                );
            }
        }
    }

    /// Run a mutating command with copy-then-restore semantics: a
    /// failed invocation leaves the original file bytes.
    fn mutate(&self, target: &Path, command: &Command) -> Result<()> {
        let backups = self
            .backups
            .as_ref()
            .expect("apply mode always has backup space");
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let backup = backups
            .path()
            .join(format!("{}.{}", self.log.entries().len(), name));
        fs::copy(target, &backup)?;
        match runner::run_command(command) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(restore) = fs::copy(&backup, target) {
                    warn!(target = %target.display(), error = %restore, "restore failed");
                }
                Err(e)
            }
        }
    }

    /// Execute a sign plan over the dependency graph.
    pub fn run_signing(
        &mut self,
        scan: &ScannedBundle,
        graph: &DependencyGraph,
        plan: &SignPlan,
    ) -> Result<()> {
        // Archives were extracted in-process during the scan; the
        // script gets the equivalent command so it is self-sufficient.
        for archive in &scan.archives {
            let participates = plan
                .steps
                .iter()
                .any(|s| matches!(s, SignStep::Repack(r) if r.archive == archive.rel_path));
            if !participates {
                continue;
            }
            let Some(entry) = scan.entry(&archive.rel_path) else {
                continue;
            };
            let command = Command::new(
                "ditto",
                vec![
                    "-x".to_string(),
                    "-k".to_string(),
                    entry.disk_path.display().to_string(),
                    archive.staging.display().to_string(),
                ],
            )
            .with_comment(format!("extract {}", archive.rel_path));
            self.log.record(
                &archive.rel_path,
                "extract archive",
                Some(command),
                ActionOutcome::Skipped {
                    reason: "extracted during scan".to_string(),
                },
            );
        }

        for step in &plan.steps {
            match step {
                SignStep::Sign(action) => self.apply_sign(action, graph),
                SignStep::Repack(repack) => self.apply_repack(repack, graph),
                SignStep::Verify { path } => {
                    self.apply_verify(path, plan)?;
                }
            }
        }
        Ok(())
    }

    fn blocked_reason(&self, target: &str, graph: &DependencyGraph) -> Option<String> {
        if target == "." {
            if !self.failures.is_empty() || !self.blocked.is_empty() {
                return Some("earlier failures in the bundle".to_string());
            }
            return None;
        }
        if let Some(reason) = self.failures.get(target) {
            return Some(format!("own fix failed: {reason}"));
        }
        graph
            .dependencies_of(target)
            .into_iter()
            .find(|dep| self.failures.contains_key(dep) || self.blocked.contains_key(dep))
            .map(|dep| format!("dependency {dep} failed"))
    }

    fn apply_sign(&mut self, action: &SignAction, graph: &DependencyGraph) {
        let command = action.command();
        if let Some(reason) = self.blocked_reason(&action.target, graph) {
            info!(entry = %action.target, reason = %reason, "sign skipped");
            self.blocked.insert(action.target.clone(), reason.clone());
            self.log.record(
                &action.target,
                "sign",
                Some(command),
                ActionOutcome::Skipped { reason },
            );
            return;
        }

        if !self.mode.is_apply() {
            self.signed.insert(action.target.clone());
            self.log
                .record(&action.target, "sign", Some(command), ActionOutcome::Applied);
            return;
        }

        match runner::run_command(&command) {
            Ok(()) => {
                self.signed.insert(action.target.clone());
                self.log
                    .record(&action.target, "sign", Some(command), ActionOutcome::Applied);
            }
            Err(e) => {
                let reason = e.to_string();
                self.failures
                    .entry(action.target.clone())
                    .or_insert_with(|| reason.clone());
                self.log.record(
                    &action.target,
                    "sign",
                    Some(command),
                    ActionOutcome::Failed { reason },
                );
            }
        }
    }

    fn apply_repack(&mut self, repack: &ArchiveRepack, graph: &DependencyGraph) {
        let commands = repack.commands();
        if let Some(reason) = self.blocked_reason(&repack.archive, graph) {
            self.blocked.insert(repack.archive.clone(), reason.clone());
            for command in commands {
                self.log.record(
                    &repack.archive,
                    "repack archive",
                    Some(command),
                    ActionOutcome::Skipped {
                        reason: reason.clone(),
                    },
                );
            }
            return;
        }

        for command in commands {
            if !self.mode.is_apply() {
                self.log.record(
                    &repack.archive,
                    "repack archive",
                    Some(command),
                    ActionOutcome::Applied,
                );
                continue;
            }
            match runner::run_command(&command) {
                Ok(()) => self.log.record(
                    &repack.archive,
                    "repack archive",
                    Some(command),
                    ActionOutcome::Applied,
                ),
                Err(e) => {
                    let reason = e.to_string();
                    self.failures
                        .entry(repack.archive.clone())
                        .or_insert_with(|| reason.clone());
                    self.log.record(
                        &repack.archive,
                        "repack archive",
                        Some(command),
                        ActionOutcome::Failed { reason },
                    );
                    return;
                }
            }
        }
    }

    fn apply_verify(&mut self, path: &Path, plan: &SignPlan) -> Result<()> {
        let command = Command::new(
            "codesign",
            vec![
                "--verify".to_string(),
                "--deep".to_string(),
                "--strict".to_string(),
                path.display().to_string(),
            ],
        )
        .with_comment("verify the sealed bundle");

        if !self.mode.is_apply() {
            self.log
                .record(".", "verify", Some(command), ActionOutcome::Applied);
            return Ok(());
        }

        let result = runner::run_probe("codesign", &[
            "--verify",
            "--deep",
            "--strict",
            &path.display().to_string(),
        ]);
        match result {
            Ok(output) if output.success() => {
                self.log
                    .record(".", "verify", Some(command), ActionOutcome::Applied);
                Ok(())
            }
            Ok(output) => {
                let reason = output.stderr.trim().to_string();
                self.log.record(
                    ".",
                    "verify",
                    Some(command),
                    ActionOutcome::Failed {
                        reason: reason.clone(),
                    },
                );
                if plan.cycles.is_empty() {
                    Ok(())
                } else {
                    Err(Error::SignOrderViolation(format!(
                        "deep verification failed after cycle-tolerant signing ({} cycle(s)): {reason}",
                        plan.cycles.len()
                    )))
                }
            }
            Err(e) => {
                self.log.record(
                    ".",
                    "verify",
                    Some(command),
                    ActionOutcome::Failed {
                        reason: e.to_string(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Per-entry outcome enumeration for the final report.
    pub fn summary(&self, scan: &ScannedBundle) -> RunSummary {
        let mut summary = RunSummary::default();
        for entry in &scan.entries {
            if entry.kind == EntryKind::Other {
                continue;
            }
            let rel = &entry.rel_path;
            let disposition = if let Some(reason) = self.failures.get(rel) {
                Disposition::Error {
                    reason: reason.clone(),
                }
            } else if let Some(reason) = self.blocked.get(rel) {
                Disposition::SkippedDependency {
                    reason: reason.clone(),
                }
            } else if let Some(reason) = self.reported.get(rel) {
                Disposition::Error {
                    reason: reason.clone(),
                }
            } else {
                match (self.fixed.contains(rel), self.signed.contains(rel)) {
                    (true, true) => Disposition::FixedSigned,
                    (true, false) => Disposition::FixedOnly,
                    (false, true) => Disposition::Signed,
                    (false, false) => Disposition::Unchanged,
                }
            };
            summary.push(rel.clone(), disposition);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::render_sh;
    use gatepass_analyzer::{build_graph, plan_fixes, plan_signing, ExemptionTable, FixRules, SignConfig};
    use gatepass_bundle::{BinaryInfo, BundleEntry};
    use std::path::PathBuf;

    fn scan_for(dir: &Path) -> ScannedBundle {
        // One executable with an absolute load path that needs a
        // rewrite, plus the library it should point at.
        let exe_path = dir.join("MyApp");
        let lib_path = dir.join("libfoo.dylib");
        fs::write(&exe_path, b"exe").unwrap();
        fs::write(&lib_path, b"lib").unwrap();

        let mut exe_info = BinaryInfo::new(vec!["arm64".to_string()]);
        exe_info.dylibs = vec!["/Users/build/out/libfoo.dylib".to_string()];
        let lib_info = BinaryInfo::new(vec!["arm64".to_string()]);

        let mut scan = ScannedBundle {
            root: dir.to_path_buf(),
            main_exe: "Contents/MacOS/MyApp".to_string(),
            entries: Vec::new(),
            binaries: Default::default(),
            archives: Vec::new(),
            external_symlinks: Vec::new(),
        };
        scan.entries.push(BundleEntry {
            rel_path: "Contents/MacOS/MyApp".to_string(),
            kind: EntryKind::Executable,
            archs: vec!["arm64".to_string()],
            mutable: true,
            content_hash: String::new(),
            archive_parent: None,
            disk_path: exe_path,
        });
        scan.binaries
            .insert("Contents/MacOS/MyApp".to_string(), exe_info);
        scan.entries.push(BundleEntry {
            rel_path: "Contents/Frameworks/libfoo.dylib".to_string(),
            kind: EntryKind::Dylib,
            archs: vec!["arm64".to_string()],
            mutable: true,
            content_hash: String::new(),
            archive_parent: None,
            disk_path: lib_path,
        });
        scan.binaries.insert(
            "Contents/Frameworks/libfoo.dylib".to_string(),
            lib_info,
        );
        scan
    }

    #[test]
    fn test_dry_run_records_commands_without_touching_files() {
        let dir = tempfile::tempdir().unwrap();
        let scan = scan_for(dir.path());
        let exemptions = ExemptionTable::default();
        let evals = plan_fixes(&scan, &exemptions, &FixRules::default());

        let before = fs::read(dir.path().join("MyApp")).unwrap();
        let mut executor = ActionExecutor::new(ExecutionMode::DryRun).unwrap();
        executor.run_fixes(&evals);

        assert_eq!(fs::read(dir.path().join("MyApp")).unwrap(), before);
        assert_eq!(executor.log().commands().count(), 1);
        assert!(executor
            .log()
            .entries()
            .iter()
            .any(|e| e.outcome == ActionOutcome::Applied));
    }

    #[test]
    fn test_apply_failure_restores_original_bytes_and_poisons_signing() {
        let dir = tempfile::tempdir().unwrap();
        let scan = scan_for(dir.path());
        let exemptions = ExemptionTable::default();
        let evals = plan_fixes(&scan, &exemptions, &FixRules::default());
        let build = build_graph(&scan, &exemptions);

        let before = fs::read(dir.path().join("MyApp")).unwrap();
        let mut executor = ActionExecutor::new(ExecutionMode::Apply).unwrap();
        // install_name_tool does not exist here, so the fix fails.
        executor.run_fixes(&evals);
        assert_eq!(fs::read(dir.path().join("MyApp")).unwrap(), before);
        assert!(executor.failures.contains_key("Contents/MacOS/MyApp"));

        let plan = plan_signing(&scan, &build.graph, &SignConfig::new("Developer ID"));
        executor.run_signing(&scan, &build.graph, &plan).unwrap();

        // The poisoned executable's sign step is skipped, with its
        // command still recorded for the script.
        let skipped = executor
            .log()
            .entries()
            .iter()
            .find(|e| {
                e.target == "Contents/MacOS/MyApp"
                    && e.action == "sign"
                    && matches!(e.outcome, ActionOutcome::Skipped { .. })
            })
            .expect("sign step for the poisoned entry");
        assert!(skipped.command.is_some());

        // The sibling library's sign was attempted (and failed here
        // only because codesign is unavailable).
        assert!(executor
            .log()
            .entries()
            .iter()
            .any(|e| e.target == "Contents/Frameworks/libfoo.dylib" && e.action == "sign"));
    }

    #[test]
    fn test_dry_run_and_apply_scripts_are_identical() {
        let dir = tempfile::tempdir().unwrap();
        let scan = scan_for(dir.path());
        let exemptions = ExemptionTable::default();
        let evals = plan_fixes(&scan, &exemptions, &FixRules::default());
        let build = build_graph(&scan, &exemptions);
        let plan = plan_signing(&scan, &build.graph, &SignConfig::new("Developer ID"));

        let mut dry = ActionExecutor::new(ExecutionMode::DryRun).unwrap();
        dry.run_fixes(&evals);
        dry.run_signing(&scan, &build.graph, &plan).unwrap();

        // Apply mode fails on every tool here; the script must come
        // out the same regardless.
        let mut apply = ActionExecutor::new(ExecutionMode::Apply).unwrap();
        apply.run_fixes(&evals);
        apply.run_signing(&scan, &build.graph, &plan).unwrap();

        assert_eq!(render_sh(dry.log()), render_sh(apply.log()));
    }

    #[test]
    fn test_summary_enumerates_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let scan = scan_for(dir.path());
        let exemptions = ExemptionTable::default();
        let evals = plan_fixes(&scan, &exemptions, &FixRules::default());
        let build = build_graph(&scan, &exemptions);
        let plan = plan_signing(&scan, &build.graph, &SignConfig::new("Developer ID"));

        let mut executor = ActionExecutor::new(ExecutionMode::DryRun).unwrap();
        executor.run_fixes(&evals);
        executor.run_signing(&scan, &build.graph, &plan).unwrap();

        let summary = executor.summary(&scan);
        assert_eq!(summary.rows.len(), 2);
        assert!(summary
            .rows
            .iter()
            .any(|r| r.entry == "Contents/MacOS/MyApp"
                && r.disposition == Disposition::FixedSigned));
        assert!(summary
            .rows
            .iter()
            .any(|r| r.entry == "Contents/Frameworks/libfoo.dylib"
                && r.disposition == Disposition::Signed));
        assert_eq!(summary.error_count(), 0);
    }
}
