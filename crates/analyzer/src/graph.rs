//! Dependency graph construction.
//!
//! Edge A→B means "A's load commands reference B inside the bundle".
//! Archives additionally depend on the entries extracted from them, so
//! repacking and signing an archive is ordered after its members.

use crate::resolve::{ExemptionTable, Resolution, ResolveContext};
use gatepass_bundle::ScannedBundle;
use gatepass_common::{Error, Result};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Directed dependency graph over bundle entries.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    fn ensure_node(&mut self, rel: &str) -> NodeIndex {
        match self.nodes.get(rel) {
            Some(&idx) => idx,
            None => {
                let idx = self.graph.add_node(rel.to_string());
                self.nodes.insert(rel.to_string(), idx);
                idx
            }
        }
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        let a = self.ensure_node(from);
        let b = self.ensure_node(to);
        if !self.graph.contains_edge(a, b) {
            self.graph.add_edge(a, b, ());
        }
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.nodes.contains_key(rel)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Entries this entry references inside the bundle.
    pub fn dependencies_of(&self, rel: &str) -> Vec<String> {
        match self.nodes.get(rel) {
            Some(&idx) => self
                .graph
                .neighbors(idx)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// All edges as (from, to) pairs, for order verification.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (self.graph[a].clone(), self.graph[b].clone()))
            .collect()
    }

    /// Strongly connected components, dependencies first.
    ///
    /// Tarjan emits components in postorder of the condensation, which
    /// is exactly the order in which they can be signed: for every edge
    /// A→B, B's component precedes A's. A component with more than one
    /// member is a reference cycle; members are scheduled together.
    pub fn components_dependencies_first(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .map(|scc| scc.into_iter().map(|idx| self.graph[idx].clone()).collect())
            .collect()
    }
}

/// A load reference that resolves outside the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRef {
    pub entry: String,
    pub reference: String,
    pub resolved: String,
}

/// A load reference that cannot be resolved at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRef {
    pub entry: String,
    pub reference: String,
}

/// Graph plus the references that did not become edges.
#[derive(Debug)]
pub struct GraphBuild {
    pub graph: DependencyGraph,
    pub externals: Vec<ExternalRef>,
    pub unresolved: Vec<UnresolvedRef>,
}

impl GraphBuild {
    /// Gate for the mutating pipelines: an unresolved reference means
    /// the binary cannot load, so nothing may be mutated.
    pub fn require_resolved(&self) -> Result<()> {
        match self.unresolved.first() {
            Some(first) => Err(Error::ReferenceResolution {
                binary: first.entry.clone(),
                reference: first.reference.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Build the dependency graph from scan results.
pub fn build_graph(scan: &ScannedBundle, exemptions: &ExemptionTable) -> GraphBuild {
    let ctx = ResolveContext::new(&scan.root, scan.exe_dir(), exemptions);
    let known: HashSet<&str> = scan.entries.iter().map(|e| e.rel_path.as_str()).collect();
    let exists = |rel: &str| known.contains(rel);
    let on_disk = |p: &std::path::Path| p.exists();

    let mut graph = DependencyGraph::default();
    let mut externals = Vec::new();
    let mut unresolved = Vec::new();

    let libraries = scan.libraries_by_name();
    for (entry, info) in scan.machos() {
        graph.ensure_node(&entry.rel_path);
        // References resolve against where the loader sees the entry:
        // archive members load from their archive's directory.
        let loader_dir = scan.root.join(entry.parent_dir());

        for reference in &info.dylibs {
            match ctx.classify_ref(reference, &loader_dir, &info.rpaths, &exists, &on_disk) {
                Resolution::InsideBundle { rel } => graph.add_edge(&entry.rel_path, &rel),
                Resolution::SystemExempt => {}
                Resolution::OutsideBundle { path } => {
                    externals.push(ExternalRef {
                        entry: entry.rel_path.clone(),
                        reference: reference.clone(),
                        resolved: path,
                    });
                    // If the bundle carries a library of the same name,
                    // the fix planner will rewrite this reference to it;
                    // sign ordering must already respect that.
                    let name = reference.rsplit('/').next().unwrap_or(reference);
                    if let Some(target) = libraries.get(name) {
                        graph.add_edge(&entry.rel_path, &target.rel_path);
                    }
                }
                Resolution::Unresolved => unresolved.push(UnresolvedRef {
                    entry: entry.rel_path.clone(),
                    reference: reference.clone(),
                }),
            }
        }
    }

    for archive in &scan.archives {
        graph.ensure_node(&archive.rel_path);
        for member in &archive.members {
            graph.add_edge(&archive.rel_path, member);
        }
    }

    GraphBuild {
        graph,
        externals,
        unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatepass_bundle::{ArchiveStaging, BinaryInfo, BundleEntry, EntryKind};
    use std::path::PathBuf;

    fn entry(rel: &str, kind: EntryKind) -> BundleEntry {
        BundleEntry {
            rel_path: rel.to_string(),
            kind,
            archs: vec!["arm64".into()],
            mutable: true,
            content_hash: String::new(),
            archive_parent: None,
            disk_path: PathBuf::from("/apps/MyApp.app").join(rel),
        }
    }

    fn info(dylibs: &[&str], rpaths: &[&str]) -> BinaryInfo {
        let mut info = BinaryInfo::new(vec!["arm64".into()]);
        info.dylibs = dylibs.iter().map(|s| s.to_string()).collect();
        info.rpaths = rpaths.iter().map(|s| s.to_string()).collect();
        info
    }

    fn scan_with(entries: Vec<(BundleEntry, Option<BinaryInfo>)>) -> ScannedBundle {
        let mut scan = ScannedBundle {
            root: PathBuf::from("/apps/MyApp.app"),
            main_exe: "Contents/MacOS/MyApp".into(),
            entries: Vec::new(),
            binaries: Default::default(),
            archives: Vec::new(),
            external_symlinks: Vec::new(),
        };
        for (e, i) in entries {
            if let Some(i) = i {
                scan.binaries.insert(e.rel_path.clone(), i);
            }
            scan.entries.push(e);
        }
        scan
    }

    #[test]
    fn test_rpath_chain_builds_edges() {
        let scan = scan_with(vec![
            (
                entry("Contents/MacOS/MyApp", EntryKind::Executable),
                Some(info(
                    &["@rpath/libfoo.dylib", "/usr/lib/libSystem.B.dylib"],
                    &["@executable_path/../Frameworks"],
                )),
            ),
            (
                entry("Contents/Frameworks/libfoo.dylib", EntryKind::Dylib),
                Some(info(
                    &["@rpath/libbar.dylib"],
                    &["@loader_path"],
                )),
            ),
            (
                entry("Contents/Frameworks/libbar.dylib", EntryKind::Dylib),
                Some(info(&[], &[])),
            ),
        ]);

        let build = build_graph(&scan, &ExemptionTable::default());
        assert!(build.unresolved.is_empty());
        assert!(build.externals.is_empty());
        assert_eq!(
            build.graph.dependencies_of("Contents/MacOS/MyApp"),
            vec!["Contents/Frameworks/libfoo.dylib".to_string()]
        );
        assert_eq!(
            build.graph.dependencies_of("Contents/Frameworks/libfoo.dylib"),
            vec!["Contents/Frameworks/libbar.dylib".to_string()]
        );
    }

    #[test]
    fn test_components_dependencies_first() {
        let scan = scan_with(vec![
            (
                entry("Contents/MacOS/MyApp", EntryKind::Executable),
                Some(info(&["@rpath/libfoo.dylib"], &["@executable_path/../Frameworks"])),
            ),
            (
                entry("Contents/Frameworks/libfoo.dylib", EntryKind::Dylib),
                Some(info(&["@rpath/libbar.dylib"], &["@loader_path"])),
            ),
            (
                entry("Contents/Frameworks/libbar.dylib", EntryKind::Dylib),
                Some(info(&[], &[])),
            ),
        ]);
        let build = build_graph(&scan, &ExemptionTable::default());
        let order: Vec<String> = build
            .graph
            .components_dependencies_first()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(
            order,
            vec![
                "Contents/Frameworks/libbar.dylib",
                "Contents/Frameworks/libfoo.dylib",
                "Contents/MacOS/MyApp"
            ]
        );
    }

    #[test]
    fn test_cycle_forms_one_component() {
        let scan = scan_with(vec![
            (
                entry("Contents/Frameworks/A.framework/A", EntryKind::FrameworkBinary),
                Some(info(&["@loader_path/../B.framework/B"], &[])),
            ),
            (
                entry("Contents/Frameworks/B.framework/B", EntryKind::FrameworkBinary),
                Some(info(&["@loader_path/../A.framework/A"], &[])),
            ),
        ]);
        let build = build_graph(&scan, &ExemptionTable::default());
        let components = build.graph.components_dependencies_first();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), 2);
    }

    #[test]
    fn test_rewritable_external_reference_still_orders_signing() {
        // The load path points at a build-machine location, but the
        // library itself ships in the bundle; the planner will rewrite
        // the path, so the edge must exist now.
        let scan = scan_with(vec![
            (
                entry("Contents/MacOS/MyApp", EntryKind::Executable),
                Some(info(&["/Users/build/out/libfoo.dylib"], &[])),
            ),
            (
                entry("Contents/Frameworks/libfoo.dylib", EntryKind::Dylib),
                Some(info(&[], &[])),
            ),
        ]);
        let build = build_graph(&scan, &ExemptionTable::default());
        assert_eq!(build.externals.len(), 1);
        assert_eq!(
            build.graph.dependencies_of("Contents/MacOS/MyApp"),
            vec!["Contents/Frameworks/libfoo.dylib".to_string()]
        );
    }

    #[test]
    fn test_unresolved_reference_reported_and_gated() {
        let scan = scan_with(vec![(
            entry("Contents/MacOS/MyApp", EntryKind::Executable),
            Some(info(&["@rpath/libmissing.dylib"], &[])),
        )]);
        let build = build_graph(&scan, &ExemptionTable::default());
        assert_eq!(build.unresolved.len(), 1);
        assert!(build.require_resolved().is_err());
    }

    #[test]
    fn test_archive_depends_on_members() {
        let mut scan = scan_with(vec![(
            entry("Contents/Java/app.jar!native/libnat.dylib", EntryKind::Dylib),
            Some(info(&[], &[])),
        )]);
        scan.entries[0].archive_parent = Some("Contents/Java/app.jar".into());
        scan.entries.push(entry("Contents/Java/app.jar", EntryKind::Archive));
        scan.archives.push(ArchiveStaging {
            rel_path: "Contents/Java/app.jar".into(),
            staging: PathBuf::from("/tmp/gp/app.jar.d"),
            members: vec!["Contents/Java/app.jar!native/libnat.dylib".into()],
            nested: vec![],
        });

        let build = build_graph(&scan, &ExemptionTable::default());
        assert_eq!(
            build.graph.dependencies_of("Contents/Java/app.jar"),
            vec!["Contents/Java/app.jar!native/libnat.dylib".to_string()]
        );
        let order: Vec<String> = build
            .graph
            .components_dependencies_first()
            .into_iter()
            .flatten()
            .collect();
        let member_pos = order
            .iter()
            .position(|p| p.contains('!'))
            .unwrap();
        let archive_pos = order
            .iter()
            .position(|p| p == "Contents/Java/app.jar")
            .unwrap();
        assert!(member_pos < archive_pos);
    }
}
