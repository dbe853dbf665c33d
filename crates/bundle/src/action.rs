//! Planned actions and the commands that realize them.
//!
//! An action is plain data: kind plus parameters. The in-process effect
//! and the script line are both derived from the same value.

use crate::command::Command;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Structural fix kinds, mirroring the load commands they repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FixKind {
    /// Rewrite `LC_ID_DYLIB` to a relocatable install name.
    RewriteLibraryId { new_id: String },
    /// Rewrite one `LC_LOAD_DYLIB` path.
    RewriteLoadPath { old: String, new: String },
    /// Rewrite one `LC_RPATH` entry in place.
    RewriteRpath { old: String, new: String },
    /// Delete one `LC_RPATH` entry. `index` is the position in the
    /// binary's rpath list at plan time; deletions on the same binary
    /// are ordered by descending index.
    DeleteRpath { index: usize, path: String },
    /// Overwrite the build-version load command.
    SetBuildVersion {
        platform: String,
        minos: String,
        sdk: String,
    },
}

/// A planned mutation of one bundle entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixAction {
    /// Bundle-relative path of the target entry.
    pub target: String,
    /// On-disk location tools operate on.
    pub target_path: PathBuf,
    #[serde(flatten)]
    pub kind: FixKind,
}

impl FixAction {
    /// The standalone command equivalent to this fix.
    pub fn command(&self) -> Command {
        let path = self.target_path.display().to_string();
        match &self.kind {
            FixKind::RewriteLibraryId { new_id } => Command::new(
                "install_name_tool",
                vec!["-id".into(), new_id.clone(), path],
            ),
            FixKind::RewriteLoadPath { old, new } => Command::new(
                "install_name_tool",
                vec!["-change".into(), old.clone(), new.clone(), path],
            ),
            FixKind::RewriteRpath { old, new } => Command::new(
                "install_name_tool",
                vec!["-rpath".into(), old.clone(), new.clone(), path],
            ),
            FixKind::DeleteRpath { path: rpath, .. } => Command::new(
                "install_name_tool",
                vec!["-delete_rpath".into(), rpath.clone(), path],
            ),
            FixKind::SetBuildVersion {
                platform,
                minos,
                sdk,
            } => Command::new(
                "vtool",
                vec![
                    "-set-build-version".into(),
                    platform.clone(),
                    minos.clone(),
                    sdk.clone(),
                    "-replace".into(),
                    "-output".into(),
                    path.clone(),
                    path,
                ],
            ),
        }
    }

    /// Short human description for the log and summary.
    pub fn describe(&self) -> String {
        match &self.kind {
            FixKind::RewriteLibraryId { new_id } => {
                format!("rewrite library id to {new_id}")
            }
            FixKind::RewriteLoadPath { old, new } => {
                format!("rewrite load path {old} -> {new}")
            }
            FixKind::RewriteRpath { old, new } => format!("rewrite rpath {old} -> {new}"),
            FixKind::DeleteRpath { path, .. } => format!("delete rpath {path}"),
            FixKind::SetBuildVersion { minos, sdk, .. } => {
                format!("set build version minos {minos} sdk {sdk}")
            }
        }
    }
}

/// A planned signature operation on one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignAction {
    pub target: String,
    pub target_path: PathBuf,
    pub identity: String,
    pub entitlements: Option<PathBuf>,
    pub hardened_runtime: bool,
}

impl SignAction {
    pub fn command(&self) -> Command {
        let mut args = vec!["--force".to_string(), "--timestamp".to_string()];
        if self.hardened_runtime {
            args.push("--options".into());
            args.push("runtime".into());
        }
        if let Some(entitlements) = &self.entitlements {
            args.push("--entitlements".into());
            args.push(entitlements.display().to_string());
        }
        args.push("--sign".into());
        args.push(self.identity.clone());
        args.push(self.target_path.display().to_string());
        Command::new("codesign", args)
    }
}

/// Repack a signed archive from its extraction directory back over the
/// original jar. Two commands: zip up the staging tree, move the result
/// into place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRepack {
    /// Bundle-relative path of the archive entry.
    pub archive: String,
    /// Extraction directory the archive's members were signed in.
    pub staging: PathBuf,
    /// The archive file inside the bundle.
    pub dest: PathBuf,
}

impl ArchiveRepack {
    pub fn commands(&self) -> Vec<Command> {
        let zip_name = format!(
            "{}.zip",
            self.dest
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "repack".to_string())
        );
        let ditto = Command::new(
            "ditto",
            vec![
                "-c".into(),
                "-k".into(),
                "--keepParent".into(),
                self.staging.display().to_string(),
                zip_name.clone(),
            ],
        )
        .with_cwd(self.staging.clone())
        .with_comment(format!("repack {}", self.archive));
        let mv = Command::new(
            "mv",
            vec![
                self.staging.join(&zip_name).display().to_string(),
                self.dest.display().to_string(),
            ],
        );
        vec![ditto, mv]
    }
}

/// One step of the signing plan, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "step")]
pub enum SignStep {
    Sign(SignAction),
    Repack(ArchiveRepack),
    /// Read-only deep verification of the signed bundle root; runs last.
    Verify { path: PathBuf },
}

impl SignStep {
    /// The target entry this step concerns, for summary bookkeeping.
    pub fn target(&self) -> &str {
        match self {
            SignStep::Sign(action) => &action.target,
            SignStep::Repack(repack) => &repack.archive,
            SignStep::Verify { .. } => "",
        }
    }
}
