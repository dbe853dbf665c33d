//! Exclusive bundle ownership for mutating runs.
//!
//! The lock file lives next to the bundle, never inside it, so
//! read-only runs stay byte-identical. Only apply-mode runs take the
//! lock.

use gatepass_common::{Error, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for the duration of one mutating run; released on drop.
#[derive(Debug)]
pub struct BundleLock {
    path: PathBuf,
}

impl BundleLock {
    /// Fail fast if another invocation owns the bundle.
    pub fn acquire(bundle_root: &Path) -> Result<Self> {
        let path = lock_path(bundle_root);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                debug!(lock = %path.display(), "bundle lock acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::BundleLocked(path))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Drop for BundleLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn lock_path(bundle_root: &Path) -> PathBuf {
    let name = bundle_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bundle".to_string());
    bundle_root
        .parent()
        .unwrap_or(bundle_root)
        .join(format!("{name}.gatepass.lock"))
}
