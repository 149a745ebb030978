//! Base system installation into the target tree.
//!
//! Repositories and keys are written first, then `apk.static` initializes
//! the package database and installs the base packages. User packages go
//! through the generated `enter-chroot`, so they are installed from inside
//! the tree (and under emulation when the architecture is foreign).

mod release;

pub use release::{extract_etc, find_base_archive, ReleaseFiles, RELEASE_PACKAGE_SINCE};

use crate::host::Host;
use crate::keys;
use crate::process::Cmd;
use crate::script::ENTER_SCRIPT;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Installed by `init_base`.
pub const BASE_PACKAGES: &[&str] = &[
    "alpine-baselayout",
    "apk-tools",
    "busybox",
    "busybox-suid",
    "musl-utils",
];

const RELEASE_PACKAGE: &str = "alpine-release";
const BASE_ARCHIVE_PACKAGE: &str = "alpine-base";
const HOST_RESOLV_CONF: &str = "/etc/resolv.conf";

/// `etc/apk/repositories` content: `main` and `community` of each mirror for
/// `branch`, then the extra repositories, in order.
pub fn repositories(mirrors: &[String], branch: &str, extra: &[String]) -> String {
    let mut lines = Vec::with_capacity(mirrors.len() * 2 + extra.len());
    for mirror in mirrors {
        let mirror = mirror.trim_end_matches('/');
        lines.push(format!("{}/{}/main", mirror, branch));
        lines.push(format!("{}/{}/community", mirror, branch));
    }
    lines.extend(extra.iter().cloned());

    let mut content = lines.join("\n");
    content.push('\n');
    content
}

pub struct PackageBootstrapper<'h> {
    host: &'h dyn Host,
    /// `apk.static` on the host.
    apk: PathBuf,
    target_dir: PathBuf,
    /// Explicitly requested architecture, passed through as `--arch`.
    arch: Option<String>,
    resolv_conf: PathBuf,
    index_refreshed: bool,
}

impl<'h> PackageBootstrapper<'h> {
    pub fn new(host: &'h dyn Host, apk: &Path, target_dir: &Path, arch: Option<&str>) -> Self {
        Self {
            host,
            apk: apk.to_path_buf(),
            target_dir: target_dir.to_path_buf(),
            arch: arch.map(str::to_string),
            resolv_conf: PathBuf::from(HOST_RESOLV_CONF),
            index_refreshed: false,
        }
    }

    /// Copy DNS configuration from somewhere other than `/etc/resolv.conf`.
    pub fn with_resolv_conf(mut self, path: &Path) -> Self {
        self.resolv_conf = path.to_path_buf();
        self
    }

    /// Whether an install from this instance already refreshed the index.
    pub fn index_refreshed(&self) -> bool {
        self.index_refreshed
    }

    fn etc_apk(&self) -> PathBuf {
        self.target_dir.join("etc/apk")
    }

    fn apk(&self) -> Cmd {
        let mut cmd = Cmd::new(&self.apk)
            .arg("--root")
            .arg_path(&self.target_dir)
            .arg("--no-progress");
        if let Some(arch) = &self.arch {
            cmd = cmd.arg("--arch").arg(arch);
        }
        cmd
    }

    pub fn write_repositories(
        &self,
        mirrors: &[String],
        branch: &str,
        extra: &[String],
    ) -> Result<PathBuf> {
        let dir = self.etc_apk();
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = dir.join("repositories");
        fs::write(&path, repositories(mirrors, branch, extra))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn install_keys(&self) -> Result<Vec<PathBuf>> {
        keys::install_keys(&self.etc_apk().join("keys"))
    }

    /// Copy the host's resolver configuration into the tree. A host without
    /// one is left as is.
    pub fn copy_resolv_conf(&self) -> Result<()> {
        if !self.resolv_conf.exists() {
            warn!(
                "{} not found; the chroot will have no DNS configuration",
                self.resolv_conf.display()
            );
            return Ok(());
        }

        let etc = self.target_dir.join("etc");
        fs::create_dir_all(&etc).with_context(|| format!("Failed to create {}", etc.display()))?;
        let dest = etc.join("resolv.conf");
        // a dangling symlink left by a previous base install would redirect the copy
        if dest.is_symlink() {
            fs::remove_file(&dest)
                .with_context(|| format!("Failed to remove {}", dest.display()))?;
        }
        fs::copy(&self.resolv_conf, &dest).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                self.resolv_conf.display(),
                dest.display()
            )
        })?;
        Ok(())
    }

    /// Initialize the package database and install [`BASE_PACKAGES`].
    pub fn init_base(&mut self) -> Result<()> {
        info!("Installing Alpine base packages into {}", self.target_dir.display());
        self.host
            .run(
                &self
                    .apk()
                    .args(["--update-cache", "--initdb", "add"])
                    .args(BASE_PACKAGES.iter().copied()),
            )
            .context("Failed to install the Alpine base system")?;
        self.index_refreshed = true;
        Ok(())
    }

    /// Put `/etc/alpine-release` and related files in place for `branch`.
    pub fn ensure_release_files(&self, branch: &str, temp_dir: &Path) -> Result<ReleaseFiles> {
        let method = ReleaseFiles::for_branch(branch);
        match method {
            ReleaseFiles::Package => {
                self.host
                    .run(&self.apk().arg("add").arg(RELEASE_PACKAGE))
                    .with_context(|| format!("Failed to install {}", RELEASE_PACKAGE))?;
            }
            ReleaseFiles::BaseArchive => {
                let scratch = temp_dir.join("alpine-base");
                if scratch.exists() {
                    fs::remove_dir_all(&scratch)
                        .with_context(|| format!("Failed to clean {}", scratch.display()))?;
                }
                fs::create_dir_all(&scratch)
                    .with_context(|| format!("Failed to create {}", scratch.display()))?;

                self.host
                    .run(
                        &self
                            .apk()
                            .arg("fetch")
                            .arg("--output")
                            .arg_path(&scratch)
                            .arg(BASE_ARCHIVE_PACKAGE),
                    )
                    .with_context(|| format!("Failed to fetch {}", BASE_ARCHIVE_PACKAGE))?;

                let archive = find_base_archive(&scratch)?;
                let extracted = extract_etc(&archive, &self.target_dir)?;
                info!(
                    "Extracted {} release files from {}",
                    extracted.len(),
                    archive.display()
                );
            }
        }
        Ok(method)
    }

    /// Install user packages from inside the tree via `enter-chroot`.
    pub fn install_packages(&mut self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let enter = self.target_dir.join(ENTER_SCRIPT);
        if !enter.exists() {
            bail!("{} does not exist; generate scripts first", enter.display());
        }

        let mut cmd = Cmd::new(&enter).args(["apk", "add"]);
        if !self.index_refreshed {
            cmd = cmd.arg("--update-cache");
        }
        info!("Installing packages: {}", packages.join(" "));
        self.host
            .run(&cmd.args(packages.iter().map(String::as_str)))
            .context("Failed to install packages")?;
        self.index_refreshed = true;
        Ok(())
    }
}
