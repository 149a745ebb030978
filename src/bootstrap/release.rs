//! `/etc/alpine-release` and friends.
//!
//! Newer branches ship these in the `alpine-release` package. Older ones
//! only have them inside `alpine-base`, which pulls in far more than a
//! build chroot wants, so for those the package archive is fetched and
//! only its `etc/` entries are unpacked.

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use std::ffi::OsStr;
use std::fs::File;
use std::path::{Component, Path, PathBuf};

/// First release with the `alpine-release` package.
pub const RELEASE_PACKAGE_SINCE: (u32, u32) = (3, 17);

/// How release files get into the tree for a given branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFiles {
    /// `apk add alpine-release`
    Package,
    /// Unpack `etc/` from the fetched `alpine-base` archive.
    BaseArchive,
}

impl ReleaseFiles {
    pub fn for_branch(branch: &str) -> Self {
        match branch {
            "edge" | "latest-stable" => ReleaseFiles::Package,
            _ => match parse_version(branch) {
                Some(version) if version >= RELEASE_PACKAGE_SINCE => ReleaseFiles::Package,
                _ => ReleaseFiles::BaseArchive,
            },
        }
    }
}

/// `v3.20` to `(3, 20)`.
fn parse_version(branch: &str) -> Option<(u32, u32)> {
    let (major, minor) = branch.strip_prefix('v')?.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Find the `alpine-base-*.apk` that `apk fetch` left in `dir`.
pub fn find_base_archive(dir: &Path) -> Result<PathBuf> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        if name.is_some_and(|n| n.starts_with("alpine-base-") && n.ends_with(".apk")) {
            return Ok(path);
        }
    }
    bail!("No alpine-base package found in {}", dir.display())
}

fn under_etc(path: &Path) -> bool {
    let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
    components.next() == Some(Component::Normal(OsStr::new("etc")))
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Unpack the `etc/` entries of an `.apk` into `target_dir`.
///
/// An `.apk` is several gzip streams (signature, control, data) each holding
/// part of one tar archive.
pub fn extract_etc(archive_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(target_dir)
        .with_context(|| format!("Failed to create {}", target_dir.display()))?;
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = tar::Archive::new(MultiGzDecoder::new(file));
    archive.set_ignore_zeros(true);
    archive.set_preserve_permissions(true);

    let mut extracted = Vec::new();
    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read {}", archive_path.display()))?
    {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if !under_etc(&path) {
            continue;
        }
        if entry
            .unpack_in(target_dir)
            .with_context(|| format!("Failed to unpack {}", path.display()))?
        {
            extracted.push(path);
        }
    }

    if extracted.is_empty() {
        bail!("{} has no etc/ entries", archive_path.display());
    }
    Ok(extracted)
}
