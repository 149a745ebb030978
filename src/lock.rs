//! Guard against two provisioning runs sharing a scratch directory.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "alpine-chroot.lock";

/// Exclusive lock held for the lifetime of a provisioning run. Released on
/// drop.
#[derive(Debug)]
pub struct ProvisionLock {
    _file: File,
    path: PathBuf,
}

impl ProvisionLock {
    /// Take the lock in `dir`, failing immediately if another process has it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(LOCK_FILE);

        // Never unlink the lock file: a second process could then lock a
        // fresh file at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            anyhow::bail!(
                "Another alpine-chroot-install run holds {}",
                path.display()
            );
        }

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_while_held() -> Result<()> {
        let temp = TempDir::new()?;
        let lock = ProvisionLock::acquire(temp.path())?;
        assert_eq!(lock.path(), temp.path().join(LOCK_FILE));

        assert!(ProvisionLock::acquire(temp.path()).is_err());

        drop(lock);
        assert!(ProvisionLock::acquire(temp.path()).is_ok());
        Ok(())
    }

    #[test]
    fn test_creates_missing_directory() -> Result<()> {
        let temp = TempDir::new()?;
        let nested = temp.path().join("a/b");
        ProvisionLock::acquire(&nested)?;
        assert!(nested.join(LOCK_FILE).exists());
        Ok(())
    }
}
