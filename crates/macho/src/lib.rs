//! Gatepass platform boundary - everything that touches the
//! filesystem or spawns `file`/`otool`/`codesign`/`install_name_tool`:
//! the bundle scanner, the binary inspector, the action executor, the
//! script emitter and the bundle lock.

pub mod archive;
pub mod executor;
pub mod inspector;
pub mod lock;
pub mod runner;
pub mod scanner;
pub mod script;

#[cfg(test)]
pub(crate) mod testutil;

pub use executor::{ActionExecutor, ExecutionMode};
pub use inspector::{BinaryInspector, FileKind, ToolInspector};
pub use lock::BundleLock;
pub use scanner::{BundleScanner, ScanConfig};
pub use script::{render_json, render_sh, write_json, write_sh};
