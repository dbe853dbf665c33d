//! Load-reference resolution and classification.
//!
//! Every path string found in a load command is resolved against the
//! referencing binary's own location, the main executable's location,
//! and the binary's declared rpath search list, then classified by
//! where it lands relative to the bundle root.

use std::path::{Component, Path, PathBuf};

pub const LOADER_PATH: &str = "@loader_path";
pub const EXECUTABLE_PATH: &str = "@executable_path";
pub const RPATH: &str = "@rpath";

/// System locations a reference may legally resolve to outside the
/// bundle. Overridable; the default mirrors what the loader ships on
/// every macOS install.
#[derive(Debug, Clone)]
pub struct ExemptionTable {
    prefixes: Vec<String>,
}

impl ExemptionTable {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    pub fn is_exempt(&self, raw: &str) -> bool {
        self.prefixes.iter().any(|p| raw.starts_with(p.as_str()))
    }
}

impl Default for ExemptionTable {
    fn default() -> Self {
        Self::new(vec![
            "/System/".to_string(),
            "/usr/".to_string(),
            "/Library/".to_string(),
        ])
    }
}

/// Where a load reference lands once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Resolves to an entry inside the bundle.
    InsideBundle { rel: String },
    /// Resolves under an exempt system prefix.
    SystemExempt,
    /// Resolves outside the bundle and outside the exemption table.
    OutsideBundle { path: String },
    /// Cannot be resolved with the full rpath list, or resolves inside
    /// the bundle to a file that does not exist.
    Unresolved,
}

/// Classification of one `LC_RPATH` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpathClass {
    /// Token-relative (`@loader_path/…`, `@executable_path/…`);
    /// relocatable as-is.
    TokenRelative,
    /// Under an exempt system prefix.
    Exempt,
    /// Absolute path that lands inside the bundle; should be made
    /// relocatable.
    InsideAbsolute { rel_dir: String },
    /// Absolute path outside the bundle and the exemption table.
    External { path: String },
    /// Neither token-relative nor absolute; the loader's behavior is
    /// undefined enough to report.
    Unresolvable,
}

/// Everything needed to resolve references for one bundle.
#[derive(Debug)]
pub struct ResolveContext<'a> {
    pub root: &'a Path,
    /// Absolute directory of the main executable.
    pub exe_dir: PathBuf,
    pub exemptions: &'a ExemptionTable,
}

impl<'a> ResolveContext<'a> {
    pub fn new(root: &'a Path, exe_dir_rel: &str, exemptions: &'a ExemptionTable) -> Self {
        Self {
            root,
            exe_dir: root.join(exe_dir_rel),
            exemptions,
        }
    }

    /// Bundle-relative form of an absolute path, if it is inside the
    /// bundle.
    pub fn rel_of(&self, abs: &Path) -> Option<String> {
        let stripped = normalize(abs);
        let rel = stripped.strip_prefix(normalize(self.root)).ok()?;
        Some(
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    /// Expand leading `@loader_path`/`@executable_path` tokens.
    /// Absolute paths pass through; `@rpath` and plain relative paths
    /// yield `None`.
    pub fn expand_tokens(&self, raw: &str, loader_dir: &Path) -> Option<PathBuf> {
        if let Some(rest) = strip_token(raw, LOADER_PATH) {
            Some(normalize(&loader_dir.join(rest)))
        } else if let Some(rest) = strip_token(raw, EXECUTABLE_PATH) {
            Some(normalize(&self.exe_dir.join(rest)))
        } else if raw.starts_with('/') {
            Some(normalize(Path::new(raw)))
        } else {
            None
        }
    }

    /// Classify one load reference of a binary located in `loader_dir`
    /// with the given declared rpath list. `exists` answers whether a
    /// bundle-relative path is a scanned entry; `on_disk` answers
    /// whether an absolute path outside the bundle exists (an external
    /// rpath can still locate a real file, which is an external
    /// dependency rather than an unresolved one).
    pub fn classify_ref(
        &self,
        raw: &str,
        loader_dir: &Path,
        rpaths: &[String],
        exists: &dyn Fn(&str) -> bool,
        on_disk: &dyn Fn(&Path) -> bool,
    ) -> Resolution {
        if self.exemptions.is_exempt(raw) {
            return Resolution::SystemExempt;
        }

        if let Some(rest) = strip_token(raw, RPATH) {
            let mut exempt_hit = false;
            let mut outside_hit = None;
            for rpath in rpaths {
                let Some(dir) = self.expand_tokens(rpath, loader_dir) else {
                    continue;
                };
                let candidate = normalize(&dir.join(rest));
                if let Some(rel) = self.rel_of(&candidate) {
                    if exists(&rel) {
                        return Resolution::InsideBundle { rel };
                    }
                } else {
                    let as_str = candidate.display().to_string();
                    if self.exemptions.is_exempt(&as_str) {
                        exempt_hit = true;
                    } else if outside_hit.is_none() && on_disk(&candidate) {
                        outside_hit = Some(as_str);
                    }
                }
            }
            if exempt_hit {
                return Resolution::SystemExempt;
            }
            return match outside_hit {
                Some(path) => Resolution::OutsideBundle { path },
                None => Resolution::Unresolved,
            };
        }

        match self.expand_tokens(raw, loader_dir) {
            Some(abs) => match self.rel_of(&abs) {
                Some(rel) if exists(&rel) => Resolution::InsideBundle { rel },
                Some(_) => Resolution::Unresolved,
                None => {
                    let as_str = abs.display().to_string();
                    if self.exemptions.is_exempt(&as_str) {
                        Resolution::SystemExempt
                    } else {
                        Resolution::OutsideBundle { path: as_str }
                    }
                }
            },
            None => Resolution::Unresolved,
        }
    }

    /// Classify one rpath entry.
    pub fn classify_rpath(&self, raw: &str) -> RpathClass {
        if raw.starts_with(LOADER_PATH) || raw.starts_with(EXECUTABLE_PATH) {
            return RpathClass::TokenRelative;
        }
        if self.exemptions.is_exempt(raw) {
            return RpathClass::Exempt;
        }
        if raw.starts_with('/') {
            let abs = normalize(Path::new(raw));
            return match self.rel_of(&abs) {
                Some(rel_dir) => RpathClass::InsideAbsolute { rel_dir },
                None => RpathClass::External {
                    path: abs.display().to_string(),
                },
            };
        }
        RpathClass::Unresolvable
    }
}

fn strip_token<'s>(raw: &'s str, token: &str) -> Option<&'s str> {
    let rest = raw.strip_prefix(token)?;
    rest.strip_prefix('/').or(if rest.is_empty() { Some("") } else { None })
}

/// Lexical normalization: fold `.` and `..` without touching the
/// filesystem (scan results must classify identically whether or not
/// the referenced files exist).
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A `@loader_path`-relative form of `target_rel` as seen from
/// `from_dir_rel` (both bundle-relative, `/`-separated).
pub fn loader_relative(from_dir_rel: &str, target_rel: &str) -> String {
    let from: Vec<&str> = from_dir_rel.split('/').filter(|c| !c.is_empty()).collect();
    let target: Vec<&str> = target_rel.split('/').filter(|c| !c.is_empty()).collect();

    let common = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts = vec![LOADER_PATH.to_string()];
    parts.extend(std::iter::repeat("..".to_string()).take(from.len() - common));
    parts.extend(target[common..].iter().map(|c| c.to_string()));
    parts.join("/")
}
