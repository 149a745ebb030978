//! QEMU user-mode emulation for foreign target architectures.
//!
//! When the target architecture differs from the host, the host needs the
//! static QEMU interpreter and a `binfmt_misc` registration for it, and the
//! interpreter has to be present inside the target tree at the same path.

use crate::arch::interpreter_name;
use crate::host::Host;
use crate::process::Cmd;
use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::info;

const HOST_BIN_DIR: &str = "/usr/bin";
const BINFMT_DIR: &str = "/proc/sys/fs/binfmt_misc";

/// Package that ships the static user-mode interpreters.
pub const QEMU_PACKAGE: &str = "qemu-user-static";
/// Package that registers interpreters with `binfmt_misc`.
pub const BINFMT_PACKAGE: &str = "binfmt-support";

/// Installs packages on the host system.
#[cfg_attr(test, mockall::automock)]
pub trait HostPackages {
    fn install(&mut self, package: &str) -> Result<()>;
}

/// `apt-get` on Debian-family hosts.
///
/// The package index is refreshed before the first install made through
/// this instance and not again.
pub struct Apt<'h> {
    host: &'h dyn Host,
    index_refreshed: bool,
}

impl<'h> Apt<'h> {
    pub fn new(host: &'h dyn Host) -> Self {
        Self {
            host,
            index_refreshed: false,
        }
    }

    pub fn index_refreshed(&self) -> bool {
        self.index_refreshed
    }
}

impl HostPackages for Apt<'_> {
    fn install(&mut self, package: &str) -> Result<()> {
        if !self.index_refreshed {
            self.host
                .run(&Cmd::new("apt-get").arg("update"))
                .context("Failed to refresh the apt package index")?;
            self.index_refreshed = true;
        }
        self.host
            .run(
                &Cmd::new("apt-get")
                    .args(["install", "-y", "--no-install-recommends"])
                    .arg(package),
            )
            .with_context(|| format!("Failed to install host package {}", package))
    }
}

/// Provisions emulation for one normalized target architecture.
#[derive(Debug, Clone)]
pub struct EmulationProvisioner {
    arch: String,
    host_bin_dir: PathBuf,
    binfmt_dir: PathBuf,
}

impl EmulationProvisioner {
    pub fn new(normalized_arch: &str) -> Self {
        Self {
            arch: normalized_arch.to_string(),
            host_bin_dir: PathBuf::from(HOST_BIN_DIR),
            binfmt_dir: PathBuf::from(BINFMT_DIR),
        }
    }

    /// Look for the interpreter and binfmt entries somewhere else.
    pub fn with_host_paths(mut self, host_bin_dir: &Path, binfmt_dir: &Path) -> Self {
        self.host_bin_dir = host_bin_dir.to_path_buf();
        self.binfmt_dir = binfmt_dir.to_path_buf();
        self
    }

    pub fn host_interpreter(&self) -> PathBuf {
        self.host_bin_dir.join(interpreter_name(&self.arch))
    }

    fn binfmt_entry(&self) -> PathBuf {
        self.binfmt_dir.join(format!("qemu-{}", self.arch))
    }

    /// Install the interpreter and enable its binfmt registration if either
    /// is missing on the host.
    pub fn ensure_host_support(
        &self,
        host: &dyn Host,
        packages: &mut dyn HostPackages,
    ) -> Result<()> {
        let interpreter = self.host_interpreter();
        if !interpreter.exists() {
            info!("Installing {} on the host", QEMU_PACKAGE);
            packages.install(QEMU_PACKAGE)?;
            if !interpreter.exists() {
                bail!(
                    "{} did not provide {}; architecture '{}' is not supported by this host",
                    QEMU_PACKAGE,
                    interpreter.display(),
                    self.arch
                );
            }
        }

        if !self.binfmt_entry().exists() {
            info!("Enabling binfmt support for qemu-{}", self.arch);
            packages.install(BINFMT_PACKAGE)?;
            host.run(
                &Cmd::new("update-binfmts")
                    .arg("--enable")
                    .arg(format!("qemu-{}", self.arch)),
            )
            .with_context(|| format!("Failed to register qemu-{} with binfmt_misc", self.arch))?;
        }

        Ok(())
    }

    /// Copy the host interpreter into `<target>/usr/bin/`, mode 0755.
    pub fn stage_interpreter(&self, target_dir: &Path) -> Result<PathBuf> {
        let source = self.host_interpreter();
        let dest_dir = target_dir.join("usr/bin");
        fs::create_dir_all(&dest_dir)
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;

        let dest = dest_dir.join(interpreter_name(&self.arch));
        fs::copy(&source, &dest).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                source.display(),
                dest.display()
            )
        })?;
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("Failed to set permissions on {}", dest.display()))?;

        Ok(dest)
    }
}
