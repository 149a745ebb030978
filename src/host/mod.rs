//! Narrow interface to privileged host operations.
//!
//! Everything that touches the mount table, asks the kernel who we are, or
//! spawns a process goes through [`Host`]. [`LinuxHost`] is the real
//! implementation; tests use the recording host in `fake`.

mod linux;

#[cfg(test)]
pub(crate) mod fake;

pub use linux::{parse_mountinfo_line, LinuxHost};

use crate::process::Cmd;
use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};

/// A filesystem attachment requested from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mount {
    /// Fresh procfs instance at `target`.
    Proc { target: PathBuf },
    /// Bind `source` onto `target`, including submounts when `recursive`.
    Bind {
        source: PathBuf,
        target: PathBuf,
        recursive: bool,
    },
}

impl Mount {
    pub fn target(&self) -> &Path {
        match self {
            Mount::Proc { target } | Mount::Bind { target, .. } => target,
        }
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mount::Proc { target } => write!(f, "proc on {}", target.display()),
            Mount::Bind {
                source,
                target,
                recursive,
            } => write!(
                f,
                "{} {} on {}",
                if *recursive { "rbind" } else { "bind" },
                source.display(),
                target.display()
            ),
        }
    }
}

/// Operations the provisioning core needs from the operating system.
pub trait Host {
    /// Whether the current process has an effective uid of 0.
    fn is_root(&self) -> bool;

    /// Machine hardware name as reported by `uname -m`.
    fn machine(&self) -> Result<String>;

    /// All current mount points.
    fn mount_points(&self) -> Result<Vec<PathBuf>>;

    /// Whether something is mounted exactly at `path`.
    fn is_mounted(&self, path: &Path) -> Result<bool> {
        Ok(self.mount_points()?.iter().any(|p| p == path))
    }

    fn mount(&self, mount: &Mount) -> Result<()>;

    /// Set private propagation on the mount at `path`.
    fn make_private(&self, path: &Path, recursive: bool) -> Result<()>;

    /// Run a command with inherited stdio; non-zero exit is an error.
    fn run(&self, cmd: &Cmd) -> Result<()>;
}
