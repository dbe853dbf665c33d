//! End-to-end pipeline over a constructed bundle with an in-memory
//! inspector: scan, check, plan, execute dry-run, emit script.

use assert_fs::prelude::*;
use gatepass_analyzer::{
    build_graph, plan_fixes, plan_signing, run_check, CheckConfig, ExemptionTable, FixRules,
    SignConfig,
};
use gatepass_bundle::{BinaryInfo, SignatureStatus};
use gatepass_common::hash;
use gatepass_common::Result;
use gatepass_macho::{
    render_sh, ActionExecutor, BundleScanner, ExecutionMode, FileKind, ScanConfig,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Serves canned inspection results keyed by file name.
#[derive(Default)]
struct FakeInspector {
    infos: HashMap<String, BinaryInfo>,
}

impl FakeInspector {
    fn add(&mut self, file_name: &str, info: BinaryInfo) {
        self.infos.insert(file_name.to_string(), info);
    }
}

impl gatepass_macho::BinaryInspector for FakeInspector {
    fn file_kind(&self, path: &Path) -> Result<FileKind> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(info) = self.infos.get(&name) {
            return Ok(FileKind::MachO {
                archs: info.archs.clone(),
            });
        }
        Ok(FileKind::Other)
    }

    fn inspect(&self, path: &Path) -> Result<BinaryInfo> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self
            .infos
            .get(&name)
            .cloned()
            .unwrap_or_else(|| BinaryInfo::new(vec!["arm64".to_string()])))
    }
}

/// A bundle whose executable reaches libbar through libfoo via rpath.
fn build_bundle(tree: &assert_fs::TempDir) -> assert_fs::fixture::ChildPath {
    let bundle = tree.child("MyApp.app");

    let mut dict = plist::Dictionary::new();
    dict.insert(
        "CFBundleExecutable".to_string(),
        plist::Value::String("MyApp".to_string()),
    );
    let plist_path = bundle.child("Contents/Info.plist");
    plist_path.touch().unwrap();
    plist::Value::Dictionary(dict)
        .to_file_xml(plist_path.path())
        .unwrap();

    bundle.child("Contents/MacOS/MyApp").write_binary(b"exe").unwrap();
    bundle
        .child("Contents/Frameworks/libfoo.dylib")
        .write_binary(b"foo")
        .unwrap();
    bundle
        .child("Contents/Frameworks/libbar.dylib")
        .write_binary(b"bar")
        .unwrap();
    bundle
        .child("Contents/Resources/icon.icns")
        .write_binary(b"icon")
        .unwrap();
    bundle
}

fn inspector_for_chain(signed: bool) -> FakeInspector {
    let signature = if signed {
        SignatureStatus::Valid
    } else {
        SignatureStatus::Unsigned
    };

    let mut exe = BinaryInfo::new(vec!["arm64".to_string()]);
    exe.dylibs = vec![
        "@rpath/libfoo.dylib".to_string(),
        "/usr/lib/libSystem.B.dylib".to_string(),
    ];
    exe.rpaths = vec!["@executable_path/../Frameworks".to_string()];
    exe.signature = signature;

    let mut foo = BinaryInfo::new(vec!["arm64".to_string()]);
    foo.lib_id = Some("@rpath/libfoo.dylib".to_string());
    foo.dylibs = vec!["@rpath/libbar.dylib".to_string()];
    foo.rpaths = vec!["@loader_path".to_string()];
    foo.signature = signature;

    let mut bar = BinaryInfo::new(vec!["arm64".to_string()]);
    bar.lib_id = Some("@rpath/libbar.dylib".to_string());
    bar.signature = signature;

    let mut inspector = FakeInspector::default();
    inspector.add("MyApp", exe);
    inspector.add("libfoo.dylib", foo);
    inspector.add("libbar.dylib", bar);
    inspector
}

/// Hash every file under a root, stable order.
fn tree_digest(root: &Path) -> BTreeMap<String, String> {
    let mut digest = BTreeMap::new();
    for dirent in walkdir::WalkDir::new(root).sort_by_file_name() {
        let dirent = dirent.unwrap();
        if dirent.file_type().is_file() {
            digest.insert(
                dirent.path().display().to_string(),
                hash::sha256_file(dirent.path()).unwrap(),
            );
        }
    }
    digest
}

#[test]
fn test_check_leaves_the_bundle_byte_identical() {
    let tree = assert_fs::TempDir::new().unwrap();
    let bundle = build_bundle(&tree);
    let staging = tree.child("staging");
    staging.create_dir_all().unwrap();

    let before = tree_digest(bundle.path());

    let inspector = inspector_for_chain(false);
    let scanner = BundleScanner::new(
        &inspector,
        ScanConfig {
            temp_dir: Some(staging.path().to_path_buf()),
        },
    );
    let scan = scanner.scan(bundle.path()).unwrap();
    let report = run_check(&scan, &CheckConfig::default(), "run-1");
    assert!(report.has_blocking()); // everything is unsigned

    assert_eq!(before, tree_digest(bundle.path()));
}

#[test]
fn test_dry_run_fixsign_signs_dependencies_first_and_mutates_nothing() {
    let tree = assert_fs::TempDir::new().unwrap();
    let bundle = build_bundle(&tree);
    let before = tree_digest(bundle.path());

    let inspector = inspector_for_chain(false);
    let scanner = BundleScanner::new(&inspector, ScanConfig::default());
    let scan = scanner.scan(bundle.path()).unwrap();

    let exemptions = ExemptionTable::default();
    let build = build_graph(&scan, &exemptions);
    build.require_resolved().unwrap();

    let evaluations = plan_fixes(&scan, &exemptions, &FixRules::default());
    let plan = plan_signing(&scan, &build.graph, &SignConfig::new("Developer ID"));

    let mut executor = ActionExecutor::new(ExecutionMode::DryRun).unwrap();
    executor.run_fixes(&evaluations);
    executor.run_signing(&scan, &build.graph, &plan).unwrap();

    let script = render_sh(executor.log());
    let bar = script.find("libbar.dylib").expect("libbar signed");
    let foo = script.find("libfoo.dylib").expect("libfoo signed");
    let app = script.find("MacOS/MyApp").expect("MyApp signed");
    assert!(bar < foo && foo < app, "sign order must be bottom-up:\n{script}");
    assert!(script.contains("--verify --deep --strict"));

    assert_eq!(before, tree_digest(bundle.path()));
}

#[test]
fn test_script_written_to_disk_matches_render() {
    let tree = assert_fs::TempDir::new().unwrap();
    let bundle = build_bundle(&tree);

    let inspector = inspector_for_chain(false);
    let scanner = BundleScanner::new(&inspector, ScanConfig::default());
    let scan = scanner.scan(bundle.path()).unwrap();

    let exemptions = ExemptionTable::default();
    let build = build_graph(&scan, &exemptions);
    let plan = plan_signing(&scan, &build.graph, &SignConfig::new("Developer ID"));

    let mut executor = ActionExecutor::new(ExecutionMode::DryRun).unwrap();
    executor.run_signing(&scan, &build.graph, &plan).unwrap();

    let sh_out = tree.child("replay.sh");
    gatepass_macho::write_sh(executor.log(), sh_out.path()).unwrap();
    sh_out.assert(predicates::path::exists());
    assert_eq!(
        std::fs::read_to_string(sh_out.path()).unwrap(),
        render_sh(executor.log())
    );
}
