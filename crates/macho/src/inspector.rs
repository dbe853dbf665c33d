//! Binary inspection via platform tools.
//!
//! All Mach-O reasoning is delegated to `file`, `otool` and `codesign`;
//! this module parses their output. Parsing is pure so it can be tested
//! against canned output on any platform.

use crate::runner::{run_probe, run_read};
use gatepass_bundle::{BinaryInfo, BuildVersion, SignatureStatus};
use gatepass_common::{Error, Result};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

static ARCH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(x86_64|arm64e|arm64|i386|ppc64|ppc)\b").unwrap());

static CMD_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*cmd\s+(\S+)").unwrap());

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*name (.+) \(offset \d+\)$").unwrap());

static PATH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*path (.+) \(offset \d+\)$").unwrap());

static PLATFORM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*platform (\S+)").unwrap());

static MINOS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*minos (\S+)").unwrap());

static SDK_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*sdk (\S+)").unwrap());

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*version (\S+)").unwrap());

/// Coarse classification from `file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    MachO { archs: Vec<String> },
    Archive,
    Other,
}

/// Reports architectures, load commands and signature state for one
/// file.
pub trait BinaryInspector {
    /// Cheap classification probe.
    fn file_kind(&self, path: &Path) -> Result<FileKind>;

    /// Full inspection of a Mach-O file.
    fn inspect(&self, path: &Path) -> Result<BinaryInfo>;
}

/// Production inspector backed by `file`, `otool` and `codesign`.
#[derive(Debug, Default)]
pub struct ToolInspector;

impl ToolInspector {
    pub fn new() -> Self {
        Self
    }
}

impl BinaryInspector for ToolInspector {
    fn file_kind(&self, path: &Path) -> Result<FileKind> {
        let out = run_read("file", &[&path.display().to_string()])?;
        Ok(parse_file_kind(&out))
    }

    fn inspect(&self, path: &Path) -> Result<BinaryInfo> {
        let archs = match self.file_kind(path)? {
            FileKind::MachO { archs } => archs,
            _ => {
                return Err(Error::UnsupportedArchitecture {
                    path: path.to_path_buf(),
                    reason: "not a Mach-O file".to_string(),
                })
            }
        };
        if archs.is_empty() {
            return Err(Error::UnsupportedArchitecture {
                path: path.to_path_buf(),
                reason: "no readable architectures".to_string(),
            });
        }
        if archs.len() > 1 {
            warn!(path = %path.display(), archs = ?archs, "universal binary");
        }

        let otool = run_read("otool", &["-l", &path.display().to_string()])?;
        let mut info = parse_load_commands(&otool);
        info.archs = archs;

        let verify = run_probe(
            "codesign",
            &["--verify", "--strict", &path.display().to_string()],
        )?;
        info.signature = parse_signature(verify.success(), &verify.stderr);

        Ok(info)
    }
}

/// Classify `file` output.
pub fn parse_file_kind(output: &str) -> FileKind {
    let lower = output.to_lowercase();
    if lower.contains("mach-o") {
        let mut archs = Vec::new();
        for m in ARCH_PATTERN.captures_iter(output) {
            let arch = m[1].to_string();
            if !archs.contains(&arch) {
                archs.push(arch);
            }
        }
        FileKind::MachO { archs }
    } else if lower.contains("java archive data (jar)") || lower.contains("zip archive data") {
        FileKind::Archive
    } else {
        FileKind::Other
    }
}

/// Parse `otool -l` output into load-command facts. Architectures and
/// signature state are filled in by the caller.
pub fn parse_load_commands(output: &str) -> BinaryInfo {
    let mut info = BinaryInfo::new(Vec::new());

    for block in split_load_commands(output) {
        let Some(cmd) = block
            .iter()
            .find_map(|line| CMD_PATTERN.captures(line).map(|c| c[1].to_string()))
        else {
            continue;
        };
        match cmd.as_str() {
            "LC_ID_DYLIB" => {
                info.lib_id = capture_first(&block, &NAME_PATTERN);
            }
            "LC_LOAD_DYLIB" | "LC_LOAD_WEAK_DYLIB" => {
                if let Some(name) = capture_first(&block, &NAME_PATTERN) {
                    info.dylibs.push(name);
                }
            }
            "LC_RPATH" => {
                if let Some(path) = capture_first(&block, &PATH_PATTERN) {
                    info.rpaths.push(path);
                }
            }
            "LC_BUILD_VERSION" => {
                info.build_version = Some(BuildVersion {
                    platform: platform_name(
                        capture_first(&block, &PLATFORM_PATTERN).as_deref(),
                    ),
                    minos: capture_first(&block, &MINOS_PATTERN),
                    sdk: capture_first(&block, &SDK_PATTERN),
                });
            }
            "LC_VERSION_MIN_MACOSX" => {
                info.build_version = Some(BuildVersion {
                    platform: "macos".to_string(),
                    minos: capture_first(&block, &VERSION_PATTERN),
                    sdk: capture_first(&block, &SDK_PATTERN),
                });
            }
            _ => {}
        }
    }
    info
}

/// Map exit state of `codesign --verify` to a signature status.
pub fn parse_signature(verified: bool, stderr: &str) -> SignatureStatus {
    if verified {
        SignatureStatus::Valid
    } else if stderr.contains("not signed at all") {
        SignatureStatus::Unsigned
    } else {
        SignatureStatus::Invalid
    }
}

fn split_load_commands(output: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in output.lines() {
        if line.trim_start().starts_with("Load command ") {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(Vec::new());
        } else if let Some(block) = current.as_mut() {
            // Lines before the first load command are the file banner.
            block.push(line);
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }
    blocks
}

fn capture_first(block: &[&str], pattern: &Regex) -> Option<String> {
    block
        .iter()
        .find_map(|line| pattern.captures(line).map(|c| c[1].to_string()))
}

fn platform_name(raw: Option<&str>) -> String {
    match raw {
        Some("1") | Some("macos") | Some("MACOS") => "macos".to_string(),
        Some(other) => other.to_string(),
        None => "macos".to_string(),
    }
}
