//! Per-binary inspection results.

use serde::{Deserialize, Serialize};

/// What the binary inspector reports for one Mach-O file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryInfo {
    /// Architectures in the file. Never empty for a valid binary.
    pub archs: Vec<String>,
    /// `LC_ID_DYLIB` install name, present on dylibs only.
    pub lib_id: Option<String>,
    /// `LC_LOAD_DYLIB` (and weak variant) paths, load-command order.
    pub dylibs: Vec<String>,
    /// `LC_RPATH` entries, load-command order. Deletion commands index
    /// into this order, so it must be preserved.
    pub rpaths: Vec<String>,
    /// Build version from `LC_BUILD_VERSION`/`LC_VERSION_MIN_MACOSX`.
    pub build_version: Option<BuildVersion>,
    pub signature: SignatureStatus,
}

impl BinaryInfo {
    pub fn new(archs: Vec<String>) -> Self {
        Self {
            archs,
            lib_id: None,
            dylibs: Vec::new(),
            rpaths: Vec::new(),
            build_version: None,
            signature: SignatureStatus::Unsigned,
        }
    }
}

/// Platform/version data from the build-version load command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildVersion {
    pub platform: String,
    pub minos: Option<String>,
    pub sdk: Option<String>,
}

impl BuildVersion {
    /// Both version fields present and parseable.
    pub fn is_complete(&self) -> bool {
        self.minos.as_deref().map(parse_version).is_some_and(|v| v.is_some())
            && self.sdk.as_deref().map(parse_version).is_some_and(|v| v.is_some())
    }

    /// Gatekeeper rejects binaries built against an SDK older than 10.9.
    pub fn meets_gatekeeper_floor(&self) -> bool {
        match self.sdk.as_deref().and_then(parse_version) {
            Some(v) => v >= (10, 9),
            None => false,
        }
    }
}

fn parse_version(s: &str) -> Option<(u32, u32)> {
    let mut it = s.split('.');
    let major = it.next()?.parse().ok()?;
    let minor = it.next().unwrap_or("0").parse().ok()?;
    Some((major, minor))
}

/// Signature state as reported by `codesign --verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    /// Signed and the seal verifies.
    Valid,
    /// No signature at all.
    Unsigned,
    /// Signed but verification failed (modified since signing, broken
    /// seal on nested resources, ...).
    Invalid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(minos: Option<&str>, sdk: Option<&str>) -> BuildVersion {
        BuildVersion {
            platform: "macos".to_string(),
            minos: minos.map(String::from),
            sdk: sdk.map(String::from),
        }
    }

    #[test]
    fn test_is_complete() {
        assert!(build(Some("11.0"), Some("11.0")).is_complete());
        assert!(!build(None, Some("11.0")).is_complete());
        assert!(!build(Some("11.0"), None).is_complete());
        assert!(!build(Some("n/a"), Some("11.0")).is_complete());
    }

    #[test]
    fn test_gatekeeper_floor() {
        assert!(build(Some("10.9"), Some("10.9")).meets_gatekeeper_floor());
        assert!(build(Some("11.0"), Some("12.3")).meets_gatekeeper_floor());
        assert!(!build(Some("10.6"), Some("10.6")).meets_gatekeeper_floor());
        assert!(!build(Some("10.6"), None).meets_gatekeeper_floor());
    }
}
