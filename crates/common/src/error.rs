//! Common error types for gatepass.

use std::path::PathBuf;
use thiserror::Error;

/// Common error type for gatepass operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not an app bundle: {path}: {reason}")]
    BundleNotFound { path: PathBuf, reason: String },

    #[error("Unsupported architecture set for {path}: {reason}")]
    UnsupportedArchitecture { path: PathBuf, reason: String },

    #[error("Unresolved load reference {reference} in {binary}")]
    ReferenceResolution { binary: String, reference: String },

    #[error("Deleting rpath {rpath} from {binary} would leave {dependency} unresolvable")]
    FixWouldBreakLoading {
        binary: String,
        rpath: String,
        dependency: String,
    },

    #[error("Post-sign verification failed: {0}")]
    SignOrderViolation(String),

    #[error("Tool invocation failed: {program} ({status}): {stderr}")]
    ToolInvocation {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Required tool not found: {0}")]
    ToolNotFound(String),

    #[error("Bundle is already in use, lock file exists: {0}")]
    BundleLocked(PathBuf),

    #[error("Plist error: {0}")]
    Plist(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using common Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
