//! Bundle entry types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Classification of a file found inside the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// The bundle's main executable or another Mach-O executable.
    Executable,
    /// A dynamic library (`.dylib`, `.so`).
    Dylib,
    /// The binary inside a `.framework` directory.
    FrameworkBinary,
    /// A jar/zip archive that may carry native libraries.
    Archive,
    /// Anything else; never inspected or mutated.
    Other,
}

/// A file inside the bundle (or inside an archive in the bundle).
///
/// Identity is the bundle-relative path for the lifetime of one run.
/// Entries surfaced from inside an archive use
/// `<archive path>!<member path>` as their relative path and carry the
/// archive's own relative path in `archive_parent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleEntry {
    /// Path relative to the bundle root, `/`-separated.
    pub rel_path: String,
    pub kind: EntryKind,
    /// Architectures reported by the inspector, e.g. `x86_64`, `arm64`.
    pub archs: Vec<String>,
    /// Whether the file may legally be modified in place.
    pub mutable: bool,
    /// SHA256 of the file contents at scan time.
    pub content_hash: String,
    /// Relative path of the archive this entry was extracted from.
    pub archive_parent: Option<String>,
    /// Where tools must operate on this entry: inside the bundle, or
    /// inside the archive's extraction directory.
    pub disk_path: PathBuf,
}

impl BundleEntry {
    /// Whether this entry is a Mach-O binary subject to fix/sign rules.
    pub fn is_macho(&self) -> bool {
        matches!(
            self.kind,
            EntryKind::Executable | EntryKind::Dylib | EntryKind::FrameworkBinary
        )
    }

    /// The file name component of the entry path.
    pub fn file_name(&self) -> &str {
        self.rel_path
            .rsplit(['/', '!'])
            .next()
            .unwrap_or(&self.rel_path)
    }

    /// The directory holding this entry, relative to the bundle root.
    ///
    /// Archive members resolve to their archive's directory, since that
    /// is where the loader would see them once repacked.
    pub fn parent_dir(&self) -> &str {
        let effective = match &self.archive_parent {
            Some(parent) => parent.as_str(),
            None => self.rel_path.as_str(),
        };
        match effective.rfind('/') {
            Some(idx) => &effective[..idx],
            None => "",
        }
    }
}
