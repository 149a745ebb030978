//! [`Host`] backed by libc syscalls, procfs and real subprocesses.

use super::{Host, Mount};
use crate::process::Cmd;
use anyhow::{bail, Context, Result};
use std::ffi::{CStr, CString};
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// The running Linux system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxHost;

impl LinuxHost {
    pub fn new() -> Self {
        Self
    }
}

fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("Path contains a NUL byte: {}", path.display()))
}

fn raw_mount(
    source: Option<&CStr>,
    target: &CStr,
    fstype: Option<&CStr>,
    flags: libc::c_ulong,
) -> io::Result<()> {
    let result = unsafe {
        libc::mount(
            source.map_or(std::ptr::null(), CStr::as_ptr),
            target.as_ptr(),
            fstype.map_or(std::ptr::null(), CStr::as_ptr),
            flags,
            std::ptr::null(),
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Host for LinuxHost {
    fn is_root(&self) -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    fn machine(&self) -> Result<String> {
        let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
        if unsafe { libc::uname(&mut uts) } != 0 {
            return Err(io::Error::last_os_error()).context("uname failed");
        }
        let machine = unsafe { CStr::from_ptr(uts.machine.as_ptr()) };
        Ok(machine.to_string_lossy().into_owned())
    }

    fn mount_points(&self) -> Result<Vec<PathBuf>> {
        let content = fs::read_to_string(MOUNTINFO)
            .with_context(|| format!("Failed to read {}", MOUNTINFO))?;
        Ok(content.lines().filter_map(parse_mountinfo_line).collect())
    }

    fn mount(&self, mount: &Mount) -> Result<()> {
        debug!("mount {}", mount);
        let target = path_cstring(mount.target())?;
        let outcome = match mount {
            Mount::Proc { .. } => raw_mount(Some(c"proc"), &target, Some(c"proc"), 0),
            Mount::Bind {
                source, recursive, ..
            } => {
                let source = path_cstring(source)?;
                let mut flags = libc::MS_BIND;
                if *recursive {
                    flags |= libc::MS_REC;
                }
                raw_mount(Some(&source), &target, None, flags)
            }
        };
        outcome.with_context(|| format!("Failed to mount {}", mount))
    }

    fn make_private(&self, path: &Path, recursive: bool) -> Result<()> {
        let target = path_cstring(path)?;
        let mut flags = libc::MS_PRIVATE;
        if recursive {
            flags |= libc::MS_REC;
        }
        raw_mount(None, &target, None, flags)
            .with_context(|| format!("Failed to make {} private", path.display()))
    }

    fn run(&self, cmd: &Cmd) -> Result<()> {
        debug!("run {}", cmd);
        let mut command = Command::new(cmd.program());
        command
            .args(cmd.get_args())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = cmd.current_dir() {
            command.current_dir(dir);
        }

        let status = command
            .status()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", cmd.name()))?;
        if !status.success() {
            bail!(
                "'{}' failed (exit code {})",
                cmd.name(),
                status.code().unwrap_or(-1)
            );
        }
        Ok(())
    }
}

/// Extract the mount point from one `/proc/self/mountinfo` line.
///
/// Format: `id parent major:minor root mount_point options ... - fstype source super`.
pub fn parse_mountinfo_line(line: &str) -> Option<PathBuf> {
    let field = line.split_whitespace().nth(4)?;
    Some(PathBuf::from(unescape_octal(field)))
}

/// Undo the kernel's `\ooo` escaping of space, tab, newline and backslash.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escape = bytes.get(i + 1..i + 4).filter(|digits| {
            bytes[i] == b'\\' && digits.iter().all(|b| (b'0'..=b'7').contains(b))
        });
        if let Some(digits) = escape {
            let value = digits
                .iter()
                .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
