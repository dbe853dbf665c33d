//! Fix planning: rule evaluation over every scanned binary.
//!
//! Every rule evaluation produces an explicit result, including "already
//! satisfied", so a second run over a fixed bundle yields a plan of
//! skips instead of silence.

use crate::resolve::{loader_relative, ExemptionTable, Resolution, ResolveContext, RpathClass};
use gatepass_bundle::{
    BinaryInfo, BundleEntry, FindingCategory, FixAction, FixKind, ScannedBundle,
};
use gatepass_common::Error;
use std::collections::HashSet;
use std::path::Path;

/// The build version written when a binary's own version data is
/// missing.
#[derive(Debug, Clone)]
pub struct DefaultBuild {
    pub platform: String,
    pub minos: String,
    pub sdk: String,
}

impl Default for DefaultBuild {
    fn default() -> Self {
        Self {
            platform: "macos".to_string(),
            minos: "11.0".to_string(),
            sdk: "11.0".to_string(),
        }
    }
}

/// Configured rule set for one fix run.
#[derive(Debug, Clone, Default)]
pub struct FixRules {
    /// Delete rpaths resolving outside the bundle (`--rc-path-delete`).
    pub delete_external_rpaths: bool,
    pub default_build: DefaultBuild,
}

/// Which rule an evaluation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    LibraryId,
    LoadPath,
    Rpath,
    BuildVersion,
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::LibraryId => "library-id",
            Rule::LoadPath => "load-path",
            Rule::Rpath => "rpath",
            Rule::BuildVersion => "build-version",
        }
    }
}

/// Outcome of evaluating one rule against one entry.
#[derive(Debug, Clone)]
pub enum EvalStatus {
    /// A fix is required and can be applied.
    Planned(FixAction),
    /// The entry already satisfies the rule.
    Satisfied,
    /// A fix was computed but refused because applying it would break
    /// the bundle's ability to load.
    Rejected { reason: String },
    /// A problem exists that no rule can repair.
    Unfixable {
        category: FindingCategory,
        details: String,
    },
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub target: String,
    pub rule: Rule,
    pub status: EvalStatus,
}

impl Evaluation {
    fn new(entry: &BundleEntry, rule: Rule, status: EvalStatus) -> Self {
        Self {
            target: entry.rel_path.clone(),
            rule,
            status,
        }
    }
}

/// Evaluate the configured rules against every Mach-O entry.
pub fn plan_fixes(
    scan: &ScannedBundle,
    exemptions: &ExemptionTable,
    rules: &FixRules,
) -> Vec<Evaluation> {
    plan_fixes_with_probe(scan, exemptions, rules, &|p| p.exists())
}

/// As [`plan_fixes`], with the outside-the-bundle existence probe
/// injectable.
pub fn plan_fixes_with_probe(
    scan: &ScannedBundle,
    exemptions: &ExemptionTable,
    rules: &FixRules,
    on_disk: &dyn Fn(&Path) -> bool,
) -> Vec<Evaluation> {
    let ctx = ResolveContext::new(&scan.root, scan.exe_dir(), exemptions);
    let known: HashSet<&str> = scan.entries.iter().map(|e| e.rel_path.as_str()).collect();
    let exists = |rel: &str| known.contains(rel);
    let libraries = scan.libraries_by_name();

    let mut evaluations = Vec::new();
    for (entry, info) in scan.machos() {
        let mut entry_evals = Vec::new();
        entry_evals.push(evaluate_library_id(entry, info, &ctx));
        entry_evals.extend(evaluate_load_paths(entry, info, &libraries, &ctx));
        entry_evals.extend(evaluate_rpaths(
            scan, entry, info, &ctx, rules, &exists, on_disk,
        ));
        entry_evals.push(evaluate_build_version(entry, info, rules));

        if !entry.mutable {
            for eval in &mut entry_evals {
                if let EvalStatus::Planned(action) = &eval.status {
                    eval.status = EvalStatus::Unfixable {
                        category: FindingCategory::ImmutableEntry,
                        details: format!(
                            "{} needed but the entry may not be modified",
                            action.describe()
                        ),
                    };
                }
            }
        }

        evaluations.extend(entry_evals);
    }
    evaluations
}

fn evaluate_library_id(
    entry: &BundleEntry,
    info: &BinaryInfo,
    ctx: &ResolveContext<'_>,
) -> Evaluation {
    let status = match &info.lib_id {
        Some(id) if !id.starts_with('@') && !ctx.exemptions.is_exempt(id) => {
            let name = id.rsplit('/').next().unwrap_or(id);
            EvalStatus::Planned(FixAction {
                target: entry.rel_path.clone(),
                target_path: entry.disk_path.clone(),
                kind: FixKind::RewriteLibraryId {
                    new_id: format!("@rpath/{name}"),
                },
            })
        }
        _ => EvalStatus::Satisfied,
    };
    Evaluation::new(entry, Rule::LibraryId, status)
}

fn evaluate_load_paths(
    entry: &BundleEntry,
    info: &BinaryInfo,
    libraries: &std::collections::HashMap<&str, &BundleEntry>,
    ctx: &ResolveContext<'_>,
) -> Vec<Evaluation> {
    let mut out = Vec::new();
    for raw in &info.dylibs {
        if raw.starts_with('@') || ctx.exemptions.is_exempt(raw) {
            continue;
        }
        let name = raw.rsplit('/').next().unwrap_or(raw);
        match libraries.get(name) {
            Some(target) => {
                let new = loader_relative(entry.parent_dir(), &target.rel_path);
                out.push(Evaluation::new(
                    entry,
                    Rule::LoadPath,
                    EvalStatus::Planned(FixAction {
                        target: entry.rel_path.clone(),
                        target_path: entry.disk_path.clone(),
                        kind: FixKind::RewriteLoadPath {
                            old: raw.clone(),
                            new,
                        },
                    }),
                ));
            }
            None => out.push(Evaluation::new(
                entry,
                Rule::LoadPath,
                EvalStatus::Unfixable {
                    category: FindingCategory::LibraryNotInBundle,
                    details: format!("linked library {raw} has no counterpart in the bundle"),
                },
            )),
        }
    }
    if out.is_empty() {
        out.push(Evaluation::new(entry, Rule::LoadPath, EvalStatus::Satisfied));
    }
    out
}

fn evaluate_rpaths(
    scan: &ScannedBundle,
    entry: &BundleEntry,
    info: &BinaryInfo,
    ctx: &ResolveContext<'_>,
    rules: &FixRules,
    exists: &dyn Fn(&str) -> bool,
    on_disk: &dyn Fn(&Path) -> bool,
) -> Vec<Evaluation> {
    let mut out = Vec::new();
    let mut delete_candidates: Vec<(usize, String)> = Vec::new();

    for (index, raw) in info.rpaths.iter().enumerate() {
        match ctx.classify_rpath(raw) {
            RpathClass::TokenRelative | RpathClass::Exempt => {}
            RpathClass::InsideAbsolute { rel_dir } => {
                out.push(Evaluation::new(
                    entry,
                    Rule::Rpath,
                    EvalStatus::Planned(FixAction {
                        target: entry.rel_path.clone(),
                        target_path: entry.disk_path.clone(),
                        kind: FixKind::RewriteRpath {
                            old: raw.clone(),
                            new: loader_relative(entry.parent_dir(), &rel_dir),
                        },
                    }),
                ));
            }
            RpathClass::External { .. } => {
                if rules.delete_external_rpaths {
                    delete_candidates.push((index, raw.clone()));
                } else {
                    out.push(Evaluation::new(
                        entry,
                        Rule::Rpath,
                        EvalStatus::Unfixable {
                            category: FindingCategory::ExternalRpath,
                            details: format!(
                                "rpath {raw} points outside the bundle, this may indicate build issues"
                            ),
                        },
                    ));
                }
            }
            RpathClass::Unresolvable => out.push(Evaluation::new(
                entry,
                Rule::Rpath,
                EvalStatus::Unfixable {
                    category: FindingCategory::UnresolvedReference,
                    details: format!("rpath {raw} is neither token-relative nor absolute"),
                },
            )),
        }
    }

    // Deletions on the same binary run highest index first so earlier
    // deletions cannot shift the indexes of later ones.
    delete_candidates.sort_by(|a, b| b.0.cmp(&a.0));
    let loader_dir = scan.root.join(entry.parent_dir());
    let mut working: Vec<String> = info.rpaths.clone();

    for (index, raw) in delete_candidates {
        let remaining: Vec<String> = working.iter().filter(|r| **r != raw).cloned().collect();
        let broken = info.dylibs.iter().find(|reference| {
            reference.starts_with("@rpath")
                && ctx.classify_ref(reference, &loader_dir, &working, exists, on_disk)
                    != Resolution::Unresolved
                && ctx.classify_ref(reference, &loader_dir, &remaining, exists, on_disk)
                    == Resolution::Unresolved
        });
        match broken {
            Some(dependency) => {
                let error = Error::FixWouldBreakLoading {
                    binary: entry.rel_path.clone(),
                    rpath: raw.clone(),
                    dependency: dependency.clone(),
                };
                out.push(Evaluation::new(
                    entry,
                    Rule::Rpath,
                    EvalStatus::Rejected {
                        reason: error.to_string(),
                    },
                ));
            }
            None => {
                working = remaining;
                out.push(Evaluation::new(
                    entry,
                    Rule::Rpath,
                    EvalStatus::Planned(FixAction {
                        target: entry.rel_path.clone(),
                        target_path: entry.disk_path.clone(),
                        kind: FixKind::DeleteRpath { index, path: raw },
                    }),
                ));
            }
        }
    }

    if out.is_empty() {
        out.push(Evaluation::new(entry, Rule::Rpath, EvalStatus::Satisfied));
    }
    out
}

fn evaluate_build_version(
    entry: &BundleEntry,
    info: &BinaryInfo,
    rules: &FixRules,
) -> Evaluation {
    let status = match &info.build_version {
        None => EvalStatus::Satisfied,
        Some(build) if build.is_complete() => {
            if build.meets_gatekeeper_floor() {
                EvalStatus::Satisfied
            } else {
                EvalStatus::Unfixable {
                    category: FindingCategory::BuildVersionTooOld,
                    details: format!(
                        "sdk {} predates the 10.9 Gatekeeper floor",
                        build.sdk.as_deref().unwrap_or("?")
                    ),
                }
            }
        }
        Some(_) => EvalStatus::Planned(FixAction {
            target: entry.rel_path.clone(),
            target_path: entry.disk_path.clone(),
            kind: FixKind::SetBuildVersion {
                platform: rules.default_build.platform.clone(),
                minos: rules.default_build.minos.clone(),
                sdk: rules.default_build.sdk.clone(),
            },
        }),
    };
    Evaluation::new(entry, Rule::BuildVersion, status)
}
