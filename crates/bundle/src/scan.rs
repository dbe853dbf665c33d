//! The in-memory result of scanning one bundle.

use crate::binary::BinaryInfo;
use crate::entry::{BundleEntry, EntryKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// An archive that was extracted for scanning, with its staging area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveStaging {
    /// Bundle-relative path of the archive file.
    pub rel_path: String,
    /// Extraction directory (scan-owned temp space).
    pub staging: PathBuf,
    /// Relative paths of the Mach-O entries surfaced from this archive.
    pub members: Vec<String>,
    /// Archives found inside this archive; reported, never descended.
    pub nested: Vec<String>,
}

/// Everything the scanner learned about one bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedBundle {
    /// Absolute bundle root (`…/MyApp.app`).
    pub root: PathBuf,
    /// Main executable, relative to the root.
    pub main_exe: String,
    pub entries: Vec<BundleEntry>,
    /// Inspection results keyed by entry relative path. Only Mach-O
    /// entries have one.
    pub binaries: HashMap<String, BinaryInfo>,
    pub archives: Vec<ArchiveStaging>,
    /// Symlinks inside the bundle whose targets resolve outside it.
    pub external_symlinks: Vec<String>,
}

impl ScannedBundle {
    pub fn entry(&self, rel_path: &str) -> Option<&BundleEntry> {
        self.entries.iter().find(|e| e.rel_path == rel_path)
    }

    /// Mach-O entries with their inspection results, scan order.
    pub fn machos(&self) -> impl Iterator<Item = (&BundleEntry, &BinaryInfo)> {
        self.entries.iter().filter_map(|e| {
            self.binaries.get(&e.rel_path).map(|info| (e, info))
        })
    }

    /// Libraries in the bundle keyed by file name, for load-path
    /// repair lookups.
    pub fn libraries_by_name(&self) -> HashMap<&str, &BundleEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.kind, EntryKind::Dylib | EntryKind::FrameworkBinary))
            .map(|e| (e.file_name(), e))
            .collect()
    }

    /// Directory of the main executable, relative to the root.
    pub fn exe_dir(&self) -> &str {
        match self.main_exe.rfind('/') {
            Some(idx) => &self.main_exe[..idx],
            None => "",
        }
    }

    /// Absolute path of an entry's directory (archive members resolve
    /// to their staging location).
    pub fn abs_dir_of(&self, entry: &BundleEntry) -> PathBuf {
        entry
            .disk_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone())
    }
}
