//! Archive (jar) scanning and staging.
//!
//! Native libraries shipped inside jars still need fixing and signing,
//! so archives are extracted one level deep into scan-owned staging
//! space and their Mach-O members surfaced as bundle entries. The
//! staging directory is where sign-phase mutations happen before the
//! archive is repacked over the original.

use crate::inspector::{BinaryInspector, FileKind};
use gatepass_bundle::{ArchiveStaging, BinaryInfo, BundleEntry, EntryKind};
use gatepass_common::{hash, Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Extract an archive and surface its Mach-O members.
pub fn scan_archive(
    inspector: &dyn BinaryInspector,
    archive_rel: &str,
    archive_path: &Path,
    staging_root: &Path,
) -> Result<(ArchiveStaging, Vec<(BundleEntry, BinaryInfo)>)> {
    let file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    // Staging persists for the whole run; on script replay the ditto
    // extraction command re-creates it.
    let staging = tempfile::Builder::new()
        .prefix(&format!("{file_name}."))
        .tempdir_in(staging_root)?
        .into_path();

    let file = fs::File::open(archive_path)?;
    let mut zip = ZipArchive::new(file)
        .map_err(|e| Error::Archive(format!("{archive_rel}: {e}")))?;

    let mut extracted: Vec<PathBuf> = Vec::new();
    for index in 0..zip.len() {
        let mut member = zip
            .by_index(index)
            .map_err(|e| Error::Archive(format!("{archive_rel}: {e}")))?;
        let Some(member_rel) = member.enclosed_name().map(Path::to_path_buf) else {
            warn!(archive = archive_rel, member = member.name(), "unsafe member path, skipped");
            continue;
        };
        let dest = staging.join(&member_rel);
        if member.is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&dest)?;
        io::copy(&mut member, &mut out)?;
        extracted.push(member_rel);
    }

    let mut members = Vec::new();
    let mut nested = Vec::new();
    let mut results = Vec::new();
    for member_rel in extracted {
        let dest = staging.join(&member_rel);
        let member_name = slash_join(&member_rel);
        match inspector.file_kind(&dest)? {
            FileKind::MachO { .. } => {
                let info = inspector.inspect(&dest)?;
                let rel = format!("{archive_rel}!{member_name}");
                let entry = BundleEntry {
                    rel_path: rel.clone(),
                    kind: kind_for_member(&member_name),
                    archs: info.archs.clone(),
                    mutable: true,
                    content_hash: hash::sha256_file(&dest)?,
                    archive_parent: Some(archive_rel.to_string()),
                    disk_path: dest,
                };
                members.push(rel);
                results.push((entry, info));
            }
            FileKind::Archive => {
                debug!(archive = archive_rel, member = %member_name, "nested archive");
                nested.push(member_name);
            }
            FileKind::Other => {}
        }
    }

    Ok((
        ArchiveStaging {
            rel_path: archive_rel.to_string(),
            staging,
            members,
            nested,
        },
        results,
    ))
}

fn kind_for_member(member_name: &str) -> EntryKind {
    if member_name.ends_with(".dylib")
        || member_name.ends_with(".so")
        || member_name.ends_with(".jnilib")
    {
        EntryKind::Dylib
    } else {
        EntryKind::Executable
    }
}

fn slash_join(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeInspector;
    use std::io::Write;
    use zip::write::FileOptions;

    fn write_jar(path: &Path, members: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in members {
            writer
                .start_file(*name, FileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_native_member_surfaced_as_entry() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("app.jar");
        write_jar(
            &jar,
            &[
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
                ("native/libnat.dylib", b"\xcf\xfa\xed\xfefake"),
            ],
        );

        let inspector = FakeInspector::default();
        let (staging, members) =
            scan_archive(&inspector, "Contents/Java/app.jar", &jar, dir.path()).unwrap();

        assert_eq!(members.len(), 1);
        let (entry, _info) = &members[0];
        assert_eq!(entry.rel_path, "Contents/Java/app.jar!native/libnat.dylib");
        assert_eq!(entry.kind, EntryKind::Dylib);
        assert_eq!(
            entry.archive_parent.as_deref(),
            Some("Contents/Java/app.jar")
        );
        assert!(entry.disk_path.starts_with(&staging.staging));
        assert!(entry.disk_path.exists());
        assert_eq!(staging.members, vec![entry.rel_path.clone()]);
    }

    #[test]
    fn test_nested_archive_reported_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner.jar");
        write_jar(&inner, &[("x.txt", b"x")]);
        let inner_bytes = fs::read(&inner).unwrap();

        let jar = dir.path().join("outer.jar");
        write_jar(&jar, &[("libs/inner.jar", &inner_bytes)]);

        let inspector = FakeInspector::default();
        let (staging, members) =
            scan_archive(&inspector, "Contents/Java/outer.jar", &jar, dir.path()).unwrap();

        assert!(members.is_empty());
        assert_eq!(staging.nested, vec!["libs/inner.jar"]);
    }

    #[test]
    fn test_plain_members_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("app.jar");
        write_jar(&jar, &[("readme.txt", b"hello")]);

        let inspector = FakeInspector::default();
        let (staging, members) =
            scan_archive(&inspector, "Contents/Java/app.jar", &jar, dir.path()).unwrap();
        assert!(members.is_empty());
        assert!(staging.nested.is_empty());
    }
}
