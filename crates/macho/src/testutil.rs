//! In-memory inspector for tests; no platform tools required.

use crate::inspector::{BinaryInspector, FileKind};
use gatepass_bundle::BinaryInfo;
use gatepass_common::Result;
use std::collections::HashMap;
use std::path::Path;

/// Classifies by extension and serves canned inspection results keyed
/// by file name.
#[derive(Debug, Default)]
pub struct FakeInspector {
    infos: HashMap<String, BinaryInfo>,
}

impl FakeInspector {
    /// Register a canned result for a file name; also marks the name
    /// as Mach-O regardless of extension.
    pub fn add(&mut self, file_name: &str, info: BinaryInfo) {
        self.infos.insert(file_name.to_string(), info);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl BinaryInspector for FakeInspector {
    fn file_kind(&self, path: &Path) -> Result<FileKind> {
        let name = file_name(path);
        if let Some(info) = self.infos.get(&name) {
            return Ok(FileKind::MachO {
                archs: info.archs.clone(),
            });
        }
        let kind = if name.ends_with(".dylib") || name.ends_with(".so") {
            FileKind::MachO {
                archs: vec!["arm64".to_string()],
            }
        } else if name.ends_with(".jar") || name.ends_with(".zip") {
            FileKind::Archive
        } else {
            FileKind::Other
        };
        Ok(kind)
    }

    fn inspect(&self, path: &Path) -> Result<BinaryInfo> {
        Ok(self
            .infos
            .get(&file_name(path))
            .cloned()
            .unwrap_or_else(|| BinaryInfo::new(vec!["arm64".to_string()])))
    }
}
