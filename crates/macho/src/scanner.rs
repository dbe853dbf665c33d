//! Bundle scanning.

use crate::archive::scan_archive;
use crate::inspector::{BinaryInspector, FileKind};
use gatepass_analyzer::resolve::normalize;
use gatepass_bundle::{BundleEntry, EntryKind, ScannedBundle};
use gatepass_common::{hash, Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Scanner configuration, passed explicitly so the core stays testable
/// without environment mutation.
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Staging root for archive extraction. Jar extraction can require
    /// a case-sensitive volume the boot volume does not provide, so
    /// operators may point this elsewhere. Defaults to the platform
    /// temp directory.
    pub temp_dir: Option<PathBuf>,
}

/// Walks a bundle tree, classifies files, and inspects binaries.
pub struct BundleScanner<'a> {
    inspector: &'a dyn BinaryInspector,
    config: ScanConfig,
}

impl<'a> BundleScanner<'a> {
    pub fn new(inspector: &'a dyn BinaryInspector, config: ScanConfig) -> Self {
        Self { inspector, config }
    }

    /// Produce the complete set of entries plus raw inspection data.
    pub fn scan(&self, root: &Path) -> Result<ScannedBundle> {
        if !root.is_dir() {
            return Err(Error::BundleNotFound {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        let root = fs::canonicalize(root)?;
        let main_exe = read_main_executable(&root)?;
        let staging_root = self
            .config
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        let mut scan = ScannedBundle {
            root: root.clone(),
            main_exe: String::new(),
            entries: Vec::new(),
            binaries: Default::default(),
            archives: Vec::new(),
            external_symlinks: Vec::new(),
        };

        for dirent in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
            let dirent = dirent.map_err(|e| Error::Io(e.into()))?;
            let path = dirent.path();
            if dirent.file_type().is_dir() {
                continue;
            }
            let rel = slash_rel(&root, path);

            if dirent.path_is_symlink() {
                // Never follow; a target outside the bundle is recorded
                // and left alone.
                if symlink_escapes(&root, path)? {
                    scan.external_symlinks.push(rel);
                }
                continue;
            }

            if matches!(path.extension().and_then(|e| e.to_str()), Some("a") | Some("o")) {
                debug!(path = %rel, "ignoring static object");
                continue;
            }

            match self.inspector.file_kind(path)? {
                FileKind::MachO { archs } => {
                    if archs.is_empty() {
                        return Err(Error::UnsupportedArchitecture {
                            path: path.to_path_buf(),
                            reason: "no readable architectures".to_string(),
                        });
                    }
                    let binary = self.inspector.inspect(path)?;
                    scan.entries.push(BundleEntry {
                        rel_path: rel.clone(),
                        kind: classify(&rel, &main_exe),
                        archs,
                        mutable: !rel.contains("/Resources/"),
                        content_hash: hash::sha256_file(path)?,
                        archive_parent: None,
                        disk_path: path.to_path_buf(),
                    });
                    scan.binaries.insert(rel, binary);
                }
                FileKind::Archive => {
                    let (staging, members) =
                        scan_archive(self.inspector, &rel, path, &staging_root)?;
                    scan.entries.push(BundleEntry {
                        rel_path: rel.clone(),
                        kind: EntryKind::Archive,
                        archs: Vec::new(),
                        mutable: true,
                        content_hash: hash::sha256_file(path)?,
                        archive_parent: None,
                        disk_path: path.to_path_buf(),
                    });
                    for (entry, info) in members {
                        scan.binaries.insert(entry.rel_path.clone(), info);
                        scan.entries.push(entry);
                    }
                    scan.archives.push(staging);
                }
                FileKind::Other => {}
            }
        }

        if !scan.binaries.contains_key(&main_exe) {
            return Err(Error::BundleNotFound {
                path: root,
                reason: format!("main executable {main_exe} is missing or not Mach-O"),
            });
        }
        scan.main_exe = main_exe;

        info!(
            entries = scan.entries.len(),
            archives = scan.archives.len(),
            external_symlinks = scan.external_symlinks.len(),
            "scan complete"
        );
        Ok(scan)
    }
}

/// Resolve `CFBundleExecutable` from `Contents/Info.plist`.
fn read_main_executable(root: &Path) -> Result<String> {
    let plist_path = root.join("Contents").join("Info.plist");
    if !plist_path.is_file() {
        return Err(Error::BundleNotFound {
            path: root.to_path_buf(),
            reason: "missing Contents/Info.plist".to_string(),
        });
    }
    let value = plist::Value::from_file(&plist_path).map_err(|e| Error::Plist(e.to_string()))?;
    let executable = value
        .as_dictionary()
        .and_then(|dict| dict.get("CFBundleExecutable"))
        .and_then(|v| v.as_string())
        .ok_or_else(|| Error::BundleNotFound {
            path: root.to_path_buf(),
            reason: "Info.plist has no CFBundleExecutable".to_string(),
        })?;
    // Both shapes occur in the wild: a bare name, or MacOS/<name>.
    Ok(match executable.strip_prefix("MacOS/") {
        Some(bare) => format!("Contents/MacOS/{bare}"),
        None => format!("Contents/MacOS/{executable}"),
    })
}

fn classify(rel: &str, main_exe: &str) -> EntryKind {
    if rel == main_exe {
        EntryKind::Executable
    } else if rel.contains(".framework/") {
        EntryKind::FrameworkBinary
    } else if rel.ends_with(".dylib") || rel.ends_with(".so") {
        EntryKind::Dylib
    } else {
        EntryKind::Executable
    }
}

fn slash_rel(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn symlink_escapes(root: &Path, link: &Path) -> Result<bool> {
    let target = fs::read_link(link)?;
    let absolute = if target.is_absolute() {
        target
    } else {
        link.parent().unwrap_or(root).join(target)
    };
    Ok(!normalize(&absolute).starts_with(root))
}
