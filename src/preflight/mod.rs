//! Host checks run before anything is written.
//!
//! Provisioning needs root for mounts and `chroot`, and the generated scripts
//! rely on a handful of host tools. Both are checked up front so a missing
//! piece fails with a clear message instead of halfway through an install.

use crate::host::Host;
use anyhow::{bail, Result};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools used by provisioning and by `enter-chroot`/`destroy`.
///
/// Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("chroot", "coreutils"),
    ("mktemp", "coreutils"),
    ("sort", "coreutils"),
    ("mountpoint", "util-linux"),
    ("umount", "mount"),
    ("sed", "sed"),
    ("awk", "mawk"),
];

/// Check that specific tools are available.
///
/// Reports every missing tool at once, with the package that provides it.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| format!("  {} (install: {})", tool, package))
        .collect();

    if !missing.is_empty() {
        bail!("Missing required host tools:\n{}", missing.join("\n"));
    }

    Ok(())
}

/// Check all of [`REQUIRED_TOOLS`].
pub fn check_host_tools() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)
}

pub fn require_root(host: &dyn Host) -> Result<()> {
    if !host.is_root() {
        bail!("This program must be run as root (try sudo)");
    }
    Ok(())
}
