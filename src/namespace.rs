//! Host filesystems bound into the target tree.
//!
//! A [`MountPlan`] lists what the chroot needs from the host, in order. The
//! [`Binder`] applies it through [`Host`] during provisioning, and the
//! generated `enter-chroot` script renders the same plan as shell so a
//! rebooted host gets the same mounts back.

use crate::host::{Host, Mount};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a binding's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A new procfs instance.
    Proc,
    /// An absolute host path.
    Host(PathBuf),
}

/// Host state a binding depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCondition {
    /// `link` is a symlink and `backing` is a directory (older Debian
    /// hosts keep shared memory in `/run/shm` behind a `/dev/shm` link).
    SymlinkWithBacking { link: PathBuf, backing: PathBuf },
    /// The directory exists on the host.
    DirExists(PathBuf),
}

impl HostCondition {
    pub fn holds(&self) -> bool {
        match self {
            HostCondition::SymlinkWithBacking { link, backing } => {
                link.is_symlink() && backing.is_dir()
            }
            HostCondition::DirExists(dir) => dir.is_dir(),
        }
    }
}

/// One host filesystem attached inside the target tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub source: Source,
    /// Mount point relative to the target root.
    pub dest: PathBuf,
    /// Include submounts (`--rbind`).
    pub recursive: bool,
    /// Set private propagation after mounting.
    pub private: bool,
    pub when: Option<HostCondition>,
}

impl Binding {
    fn bind(source: &str, dest: &str, recursive: bool) -> Self {
        Self {
            source: Source::Host(PathBuf::from(source)),
            dest: PathBuf::from(dest),
            recursive,
            private: true,
            when: None,
        }
    }

    fn to_mount(&self, target: PathBuf) -> Mount {
        match &self.source {
            Source::Proc => Mount::Proc { target },
            Source::Host(source) => Mount::Bind {
                source: source.clone(),
                target,
                recursive: self.recursive,
            },
        }
    }
}

/// Ordered set of bindings for one target tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPlan {
    bindings: Vec<Binding>,
}

impl MountPlan {
    /// proc, sys, dev, shared memory when the host uses the `/run/shm`
    /// layout, and `bind_dir` at its own path when it exists.
    pub fn standard(bind_dir: Option<&Path>) -> Self {
        let mut bindings = vec![
            Binding {
                source: Source::Proc,
                dest: PathBuf::from("proc"),
                recursive: false,
                private: false,
                when: None,
            },
            Binding::bind("/sys", "sys", true),
            Binding::bind("/dev", "dev", true),
            Binding {
                when: Some(HostCondition::SymlinkWithBacking {
                    link: PathBuf::from("/dev/shm"),
                    backing: PathBuf::from("/run/shm"),
                }),
                ..Binding::bind("/run/shm", "run/shm", false)
            },
        ];

        if let Some(dir) = bind_dir {
            bindings.push(Binding {
                source: Source::Host(dir.to_path_buf()),
                dest: relative_to_root(dir),
                recursive: false,
                private: true,
                when: Some(HostCondition::DirExists(dir.to_path_buf())),
            });
        }

        Self { bindings }
    }

    pub fn from_bindings(bindings: Vec<Binding>) -> Self {
        Self { bindings }
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }
}

/// `/a/b` becomes `a/b`, so it can be joined onto the target root.
fn relative_to_root(path: &Path) -> PathBuf {
    path.strip_prefix("/").unwrap_or(path).to_path_buf()
}

/// Applies a [`MountPlan`] to a target tree.
pub struct Binder<'h> {
    host: &'h dyn Host,
}

impl<'h> Binder<'h> {
    pub fn new(host: &'h dyn Host) -> Self {
        Self { host }
    }

    /// Mount every applicable binding under `target_dir`.
    ///
    /// Destinations that already carry a mount are skipped. A failure stops
    /// immediately; mounts made so far stay for `destroy` to remove.
    pub fn bind(&self, target_dir: &Path, plan: &MountPlan) -> Result<Vec<PathBuf>> {
        // Resolve the root only; a symlink inside the tree points into the
        // chroot, not at the host.
        let root = fs::canonicalize(target_dir)
            .with_context(|| format!("Failed to resolve {}", target_dir.display()))?;
        let mut mounted = Vec::new();

        for binding in plan.bindings() {
            if binding.when.as_ref().is_some_and(|c| !c.holds()) {
                debug!("skipping {}: host condition not met", binding.dest.display());
                continue;
            }

            let dest = root.join(&binding.dest);
            if self.host.is_mounted(&dest)? {
                debug!("{} is already mounted", dest.display());
                continue;
            }

            fs::create_dir_all(&dest)
                .with_context(|| format!("Failed to create mount point {}", dest.display()))?;
            self.host.mount(&binding.to_mount(dest.clone()))?;
            if binding.private {
                self.host.make_private(&dest, binding.recursive)?;
            }
            info!("Mounted {}", dest.display());
            mounted.push(dest);
        }

        Ok(mounted)
    }
}
