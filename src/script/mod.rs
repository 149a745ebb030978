//! Helper scripts written into the target tree.
//!
//! Scripts are built as an ordered list of [`Step`]s and rendered to POSIX
//! shell in one place. Every value that comes from configuration is passed
//! through [`quote`], so paths and patterns never reach the shell unquoted.
//!
//! - `enter-chroot` restores mounts if needed, snapshots selected host
//!   variables into `/env.sh` and runs a command inside the tree.
//! - `destroy` unmounts everything below the tree (deepest first) and
//!   optionally removes it.

mod destroy;
mod enter;
mod env;

pub use destroy::destroy_script;
pub use enter::enter_script;
pub use env::EnvFilter;

use crate::namespace::{Binding, HostCondition, Source};
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const ENTER_SCRIPT: &str = "enter-chroot";
pub const DESTROY_SCRIPT: &str = "destroy";

/// File inside the tree that holds the exported host variables.
pub const ENV_SNAPSHOT: &str = "env.sh";

/// Single-quote `s` for the shell.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

/// Print the mount points at or below `$dir`, with the kernel's `\ooo`
/// escapes in the mount table decoded.
const MOUNTS_BELOW_DIR: &str = r#"function decode(s,    out, i, o) {
	out = ""
	while ((i = index(s, "\\")) > 0) {
		o = substr(s, i + 1, 3)
		if (o ~ /^[0-7][0-7][0-7]$/) {
			out = out substr(s, 1, i - 1) sprintf("%c", substr(o, 1, 1) * 64 + substr(o, 2, 1) * 8 + substr(o, 3, 1))
			s = substr(s, i + 4)
		} else {
			out = out substr(s, 1, i)
			s = substr(s, i + 1)
		}
	}
	return out s
}
BEGIN { dir = ENVIRON["dir"] }
{ path = decode($2) }
path == dir || index(path, dir "/") == 1 { print path }"#;

/// One unit of behavior in a generated script.
#[derive(Debug, Clone)]
pub enum Step {
    /// `set -e`
    ExitOnError,
    /// Use `sudo` for privileged commands unless already root.
    DetectPrivilege,
    /// Accept `-u <user>` as the first option; default `root`.
    ParseUser,
    SaveWorkingDir,
    /// `cd` to the directory holding the script.
    EnterScriptDir,
    /// Resolve the script's directory to an absolute path in `$script_dir`.
    ResolveScriptDir,
    Export { name: String, value: String },
    /// Write the kept variables to a temporary file.
    SnapshotEnv(EnvFilter),
    /// Mount a binding unless its destination is already a mount point.
    EnsureMount(Binding),
    /// Move the snapshot into the tree as `/env.sh`.
    InstallSnapshot,
    /// Run the command (default: a shell) in the tree as `$user`.
    ChrootExec,
    /// Accept only `-r`/`--remove`.
    ParseRemoveFlag,
    /// Unmount every mount under `$script_dir`, deepest first.
    UnmountBelow { mount_table: PathBuf },
    /// Remove `$script_dir` with `--remove`; otherwise print how.
    RemoveTree,
}

impl Step {
    fn render(&self, out: &mut String) -> std::fmt::Result {
        match self {
            Step::ExitOnError => writeln!(out, "set -e"),
            Step::DetectPrivilege => {
                writeln!(out, "_sudo=''")?;
                writeln!(out, "[ \"$(id -u)\" -eq 0 ] || _sudo='sudo'")
            }
            Step::ParseUser => {
                writeln!(out, "user='root'")?;
                writeln!(out, "if [ $# -ge 2 ] && [ \"$1\" = '-u' ]; then")?;
                writeln!(out, "\tuser=\"$2\"")?;
                writeln!(out, "\tshift 2")?;
                writeln!(out, "fi")
            }
            Step::SaveWorkingDir => writeln!(out, "oldpwd=\"$(pwd)\""),
            Step::EnterScriptDir => writeln!(out, "cd \"$(dirname \"$0\")\""),
            Step::ResolveScriptDir => {
                writeln!(out, "script_dir=\"$(cd \"$(dirname \"$0\")\" && pwd -P)\"")
            }
            Step::Export { name, value } => writeln!(out, "export {}={}", name, quote(value)),
            Step::SnapshotEnv(filter) => {
                writeln!(out, "tmpfile=\"$(mktemp)\"")?;
                writeln!(out, "chmod 644 \"$tmpfile\"")?;
                if filter.is_empty() {
                    writeln!(out, ": > \"$tmpfile\"")
                } else {
                    writeln!(
                        out,
                        "export -p | sed -En {} > \"$tmpfile\"",
                        quote(&filter.sed_program())
                    )
                }
            }
            Step::EnsureMount(binding) => render_mount(binding, out),
            Step::InstallSnapshot => {
                writeln!(out, "$_sudo cp \"$tmpfile\" {}.new", ENV_SNAPSHOT)?;
                writeln!(out, "$_sudo chmod 644 {}.new", ENV_SNAPSHOT)?;
                writeln!(out, "$_sudo mv -f {0}.new {0}", ENV_SNAPSHOT)?;
                writeln!(out, "rm -f \"$tmpfile\"")
            }
            Step::ChrootExec => {
                writeln!(out, "[ $# -gt 0 ] || set -- sh")?;
                writeln!(out, "$_sudo chroot . /usr/bin/env -i su -l \"$user\" \\")?;
                writeln!(
                    out,
                    "\tsh -c {} \\",
                    quote(&format!(
                        ". /etc/profile; . /{}; cd \"$1\" 2>/dev/null || true; shift; \"$@\"",
                        ENV_SNAPSHOT
                    ))
                )?;
                writeln!(out, "\t-- \"$oldpwd\" \"$@\"")
            }
            Step::ParseRemoveFlag => {
                writeln!(out, "remove=no")?;
                writeln!(out, "case \"$#:${{1:-}}\" in")?;
                writeln!(out, "\t0:) ;;")?;
                writeln!(out, "\t1:-r | 1:--remove) remove=yes;;")?;
                writeln!(out, "\t*) echo \"Usage: $0 [-r | --remove]\" >&2; exit 1;;")?;
                writeln!(out, "esac")
            }
            Step::UnmountBelow { mount_table } => {
                writeln!(
                    out,
                    "dir=\"$script_dir\" awk {} {} \\",
                    quote(MOUNTS_BELOW_DIR),
                    quote_path(mount_table)
                )?;
                writeln!(out, "\t| sort -r \\")?;
                writeln!(out, "\t| while IFS= read -r path; do")?;
                writeln!(out, "\t\techo \"Unmounting $path\" >&2")?;
                writeln!(out, "\t\t$_sudo umount -f -c \"$path\" || exit 1")?;
                writeln!(out, "\tdone")
            }
            Step::RemoveTree => {
                writeln!(out, "rm_flags='-Rf'")?;
                writeln!(
                    out,
                    "if rm --help 2>&1 | grep -q -- '--one-file-system'; then"
                )?;
                writeln!(out, "\trm_flags=\"$rm_flags --one-file-system\"")?;
                writeln!(out, "fi")?;
                writeln!(out, "if [ \"$remove\" = yes ]; then")?;
                writeln!(out, "\techo \"Removing $script_dir\" >&2")?;
                writeln!(out, "\t$_sudo rm $rm_flags \"$script_dir\"")?;
                writeln!(out, "else")?;
                writeln!(
                    out,
                    "\techo \"Chroot unmounted. To remove it, run: rm $rm_flags $script_dir\""
                )?;
                writeln!(out, "fi")
            }
        }
    }
}

fn render_condition(condition: &HostCondition) -> String {
    match condition {
        HostCondition::SymlinkWithBacking { link, backing } => format!(
            "[ -L {} ] && [ -d {} ]",
            quote_path(link),
            quote_path(backing)
        ),
        HostCondition::DirExists(dir) => format!("[ -d {} ]", quote_path(dir)),
    }
}

fn render_mount(binding: &Binding, out: &mut String) -> std::fmt::Result {
    let dest = quote_path(&binding.dest);
    let mut actions = vec![format!("$_sudo mkdir -p {}", dest)];
    match &binding.source {
        Source::Proc => actions.push(format!("$_sudo mount -t proc none {}", dest)),
        Source::Host(source) => {
            let flag = if binding.recursive { "--rbind" } else { "--bind" };
            actions.push(format!(
                "$_sudo mount {} {} {}",
                flag,
                quote_path(source),
                dest
            ));
        }
    }
    if binding.private {
        let flag = if binding.recursive {
            "--make-rprivate"
        } else {
            "--make-private"
        };
        actions.push(format!("$_sudo mount {} {}", flag, dest));
    }

    let line = format!(
        "mountpoint -q {} || {{ {}; }}",
        dest,
        actions.join(" && ")
    );
    match &binding.when {
        Some(condition) => writeln!(out, "if {}; then\n\t{}\nfi", render_condition(condition), line),
        None => writeln!(out, "{}", line),
    }
}

/// An ordered list of steps rendered as a POSIX shell script.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#!/bin/sh\n");
        for step in &self.steps {
            // writing into a String cannot fail
            let _ = step.render(&mut out);
        }
        out
    }

    /// Write the rendered script to `path` with mode 0755.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))
    }
}

/// Write `enter-chroot` and `destroy` into the target root.
pub fn write_scripts(target_dir: &Path, enter: &Script, destroy: &Script) -> Result<[PathBuf; 2]> {
    let enter_path = target_dir.join(ENTER_SCRIPT);
    let destroy_path = target_dir.join(DESTROY_SCRIPT);
    enter.write_to(&enter_path)?;
    destroy.write_to(&destroy_path)?;
    Ok([enter_path, destroy_path])
}
