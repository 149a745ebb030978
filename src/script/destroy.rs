use super::{Script, Step};
use std::path::Path;

const MOUNT_TABLE: &str = "/proc/mounts";

/// Build `destroy`.
pub fn destroy_script() -> Script {
    with_mount_table(Path::new(MOUNT_TABLE))
}

pub(crate) fn with_mount_table(mount_table: &Path) -> Script {
    Script::new()
        .step(Step::ExitOnError)
        .step(Step::ResolveScriptDir)
        .step(Step::DetectPrivilege)
        .step(Step::ParseRemoveFlag)
        .step(Step::UnmountBelow {
            mount_table: mount_table.to_path_buf(),
        })
        .step(Step::RemoveTree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::process::{Command, Output};
    use tempfile::TempDir;

    /// A chroot directory with a `destroy` script reading a fake mount
    /// table, plus `umount` and `sudo` stand-ins that log instead of acting.
    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        bin: PathBuf,
        table: PathBuf,
        log: PathBuf,
    }

    fn write_exec(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    impl Fixture {
        fn new() -> Self {
            Self::named("alpine")
        }

        fn named(dir_name: &str) -> Self {
            let temp = TempDir::new().unwrap();
            let base = temp.path().canonicalize().unwrap();
            let root = base.join(dir_name);
            let bin = base.join("bin");
            fs::create_dir_all(&root).unwrap();
            fs::create_dir_all(&bin).unwrap();
            let table = base.join("mounts");
            let log = base.join("umount.log");

            write_exec(&bin.join("sudo"), "exec \"$@\"\n");
            with_mount_table(&table).write_to(&root.join("destroy")).unwrap();

            let fixture = Self {
                _temp: temp,
                root,
                bin,
                table,
                log,
            };
            fixture.fake_umount("");
            fixture
        }

        /// `umount` logs its path argument and runs `extra` afterwards.
        fn fake_umount(&self, extra: &str) {
            write_exec(
                &self.bin.join("umount"),
                &format!("echo \"$3\" >> \"$UMOUNT_LOG\"\n{extra}exit 0\n"),
            );
        }

        /// Write the mount table, escaping spaces the way the kernel does.
        fn mounts(&self, points: &[PathBuf]) {
            let lines: String = points
                .iter()
                .map(|p| {
                    let escaped = p.display().to_string().replace(' ', r"\040");
                    format!("none {escaped} tmpfs rw 0 0\n")
                })
                .collect();
            fs::write(&self.table, lines).unwrap();
        }

        fn run(&self, args: &[&str]) -> Output {
            self.run_script(&self.root.join("destroy"), args)
        }

        fn run_script(&self, script: &Path, args: &[&str]) -> Output {
            let path = format!(
                "{}:{}",
                self.bin.display(),
                std::env::var("PATH").unwrap_or_default()
            );
            Command::new(script)
                .args(args)
                .env("PATH", path)
                .env("UMOUNT_LOG", &self.log)
                .output()
                .unwrap()
        }

        fn unmounted(&self) -> Vec<PathBuf> {
            fs::read_to_string(&self.log)
                .unwrap_or_default()
                .lines()
                .map(PathBuf::from)
                .collect()
        }
    }

    #[test]
    fn test_unmounts_deepest_first_and_only_below_root() {
        let fx = Fixture::new();
        let sibling = PathBuf::from(format!("{}-other", fx.root.display()));
        fx.mounts(&[
            PathBuf::from("/"),
            fx.root.join("proc"),
            fx.root.join("sys"),
            fx.root.join("sys/fs/cgroup"),
            fx.root.join("dev"),
            fx.root.join("dev/pts"),
            sibling,
        ]);

        let output = fx.run(&[]);
        assert!(output.status.success(), "{:?}", output);

        let unmounted = fx.unmounted();
        assert_eq!(unmounted.len(), 5);
        for (i, path) in unmounted.iter().enumerate() {
            assert!(path.starts_with(&fx.root));
            // a mount is never unmounted before something below it
            for later in &unmounted[i + 1..] {
                assert!(!later.starts_with(path) || later == path);
            }
        }
        let pos = |p: PathBuf| unmounted.iter().position(|u| *u == p).unwrap();
        assert!(pos(fx.root.join("sys/fs/cgroup")) < pos(fx.root.join("sys")));
        assert!(pos(fx.root.join("dev/pts")) < pos(fx.root.join("dev")));
        assert!(fx.root.is_dir());
        assert!(String::from_utf8_lossy(&output.stdout).contains("rm -Rf"));
    }

    #[test]
    fn test_unmounts_when_invoked_through_symlink() {
        let fx = Fixture::new();
        let link = fx.bin.with_file_name("link");
        std::os::unix::fs::symlink(&fx.root, &link).unwrap();
        fx.mounts(&[fx.root.join("proc"), fx.root.join("sys")]);

        let output = fx.run_script(&link.join("destroy"), &[]);

        assert!(output.status.success(), "{:?}", output);
        assert_eq!(fx.unmounted(), [fx.root.join("sys"), fx.root.join("proc")]);
        assert!(String::from_utf8_lossy(&output.stdout).contains(&*fx.root.to_string_lossy()));
    }

    #[test]
    fn test_unmounts_paths_with_spaces() {
        let fx = Fixture::named("my alpine");
        fx.mounts(&[
            fx.root.join("proc"),
            fx.root.join("dev"),
            fx.root.join("dev/pts"),
        ]);

        let output = fx.run(&[]);

        assert!(output.status.success(), "{:?}", output);
        assert_eq!(
            fx.unmounted(),
            [fx.root.join("proc"), fx.root.join("dev/pts"), fx.root.join("dev")]
        );
    }

    #[test]
    fn test_failed_unmount_aborts() {
        let fx = Fixture::new();
        let dev = fx.root.join("dev");
        fx.fake_umount(&format!("[ \"$3\" = '{}' ] && exit 1\n", dev.display()));
        fx.mounts(&[fx.root.join("proc"), dev.clone(), fx.root.join("dev/pts")]);

        let output = fx.run(&["--remove"]);

        assert!(!output.status.success());
        assert_eq!(
            fx.unmounted(),
            [fx.root.join("proc"), fx.root.join("dev/pts"), dev]
        );
        assert!(fx.root.is_dir());
    }

    #[test]
    fn test_remove_deletes_tree() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.root.join("etc/apk")).unwrap();
        fx.mounts(&[]);

        let output = fx.run(&["-r"]);

        assert!(output.status.success(), "{:?}", output);
        assert!(!fx.root.exists());
    }

    #[test]
    fn test_unknown_argument_prints_usage() {
        let fx = Fixture::new();
        fx.mounts(&[fx.root.join("proc")]);

        let output = fx.run(&["--force"]);

        assert_eq!(output.status.code(), Some(1));
        assert!(String::from_utf8_lossy(&output.stderr).contains("Usage:"));
        assert!(fx.unmounted().is_empty());
    }
}
