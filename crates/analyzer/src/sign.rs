//! Sign planning: dependency-respecting signature order.
//!
//! codesign seals a hash of everything a binary references, so an outer
//! binary's signature is invalidated whenever an inner one changes. The
//! plan therefore signs dependencies first, repacks archives after
//! their members, and seals the bundle root last.

use crate::graph::DependencyGraph;
use gatepass_bundle::{ArchiveRepack, BundleEntry, EntryKind, ScannedBundle, SignAction, SignStep};
use gatepass_common::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Raw YAML form of one entitlements mapping rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntitlementRule {
    pub pattern: String,
    pub entitlements: PathBuf,
}

/// The `--entitlements-map` file: first matching pattern wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntitlementsMapFile {
    #[serde(default)]
    pub rules: Vec<RawEntitlementRule>,
}

/// A compiled glob → entitlements rule.
#[derive(Debug, Clone)]
pub struct EntitlementRule {
    pattern: glob::Pattern,
    pub entitlements: PathBuf,
}

impl EntitlementRule {
    pub fn compile(raw: &RawEntitlementRule) -> Result<Self> {
        let pattern = glob::Pattern::new(&raw.pattern)
            .map_err(|e| Error::Config(format!("bad entitlements pattern {}: {e}", raw.pattern)))?;
        Ok(Self {
            pattern,
            entitlements: raw.entitlements.clone(),
        })
    }

    pub fn matches(&self, rel: &str) -> bool {
        self.pattern.matches(rel)
    }
}

/// Caller-supplied signing configuration.
#[derive(Debug, Clone)]
pub struct SignConfig {
    pub identity: String,
    /// Baseline entitlements for entries no rule matches.
    pub default_entitlements: Option<PathBuf>,
    pub rules: Vec<EntitlementRule>,
    pub hardened_runtime: bool,
}

impl SignConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            default_entitlements: None,
            rules: Vec::new(),
            hardened_runtime: true,
        }
    }

    fn entitlements_for(&self, rel: &str) -> Option<PathBuf> {
        self.rules
            .iter()
            .find(|r| r.matches(rel))
            .map(|r| r.entitlements.clone())
            .or_else(|| self.default_entitlements.clone())
    }
}

/// The computed signing sequence plus any cycles found on the way.
#[derive(Debug)]
pub struct SignPlan {
    pub steps: Vec<SignStep>,
    /// Mutually-referencing groups scheduled together without relative
    /// precedence.
    pub cycles: Vec<Vec<String>>,
}

/// Compute a valid signing order over the dependency graph.
pub fn plan_signing(
    scan: &ScannedBundle,
    graph: &DependencyGraph,
    config: &SignConfig,
) -> SignPlan {
    let mut steps = Vec::new();
    let mut cycles = Vec::new();

    for component in graph.components_dependencies_first() {
        if component.len() > 1 {
            warn!(
                members = ?component,
                "reference cycle, members signed without relative order"
            );
            cycles.push(component.clone());
        }
        for rel in component {
            let Some(entry) = scan.entry(&rel) else {
                continue;
            };
            match entry.kind {
                EntryKind::Archive => {
                    if let Some(archive) = scan.archives.iter().find(|a| a.rel_path == rel) {
                        steps.push(SignStep::Repack(ArchiveRepack {
                            archive: rel.clone(),
                            staging: archive.staging.clone(),
                            dest: entry.disk_path.clone(),
                        }));
                    }
                    steps.push(SignStep::Sign(sign_action(entry, config)));
                }
                EntryKind::Other => {}
                _ => steps.push(SignStep::Sign(sign_action(entry, config))),
            }
        }
    }

    // Seal the bundle directory itself last, then verify the whole
    // thing outer-to-inner.
    steps.push(SignStep::Sign(SignAction {
        target: ".".to_string(),
        target_path: scan.root.clone(),
        identity: config.identity.clone(),
        entitlements: config.default_entitlements.clone(),
        hardened_runtime: config.hardened_runtime,
    }));
    steps.push(SignStep::Verify {
        path: scan.root.clone(),
    });

    SignPlan { steps, cycles }
}

fn sign_action(entry: &BundleEntry, config: &SignConfig) -> SignAction {
    SignAction {
        target: entry.rel_path.clone(),
        target_path: entry.disk_path.clone(),
        identity: config.identity.clone(),
        entitlements: config.entitlements_for(&entry.rel_path),
        hardened_runtime: config.hardened_runtime,
    }
}
