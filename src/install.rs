//! End-to-end provisioning of one Alpine tree.

use crate::arch::EmulationPlan;
use crate::bootstrap::PackageBootstrapper;
use crate::config::Config;
use crate::emulation::{EmulationProvisioner, HostPackages};
use crate::fetch::Fetcher;
use crate::host::Host;
use crate::lock::ProvisionLock;
use crate::namespace::{Binder, MountPlan};
use crate::preflight::require_root;
use crate::script::{destroy_script, enter_script, write_scripts};
use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::info;

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    pub target_dir: PathBuf,
    pub enter_script: PathBuf,
    pub destroy_script: PathBuf,
    pub emulation: EmulationPlan,
}

pub struct Installer<'a> {
    config: &'a Config,
    host: &'a dyn Host,
    fetcher: Fetcher,
    host_paths: Option<(PathBuf, PathBuf)>,
    resolv_conf: Option<PathBuf>,
}

impl<'a> Installer<'a> {
    pub fn new(config: &'a Config, host: &'a dyn Host, fetcher: Fetcher) -> Self {
        Self {
            config,
            host,
            fetcher,
            host_paths: None,
            resolv_conf: None,
        }
    }

    /// Look for QEMU interpreters and binfmt entries in other directories.
    pub fn with_host_paths(mut self, bin_dir: &Path, binfmt_dir: &Path) -> Self {
        self.host_paths = Some((bin_dir.to_path_buf(), binfmt_dir.to_path_buf()));
        self
    }

    pub fn with_resolv_conf(mut self, path: &Path) -> Self {
        self.resolv_conf = Some(path.to_path_buf());
        self
    }

    fn provisioner(&self, arch: &str) -> EmulationProvisioner {
        let provisioner = EmulationProvisioner::new(arch);
        match &self.host_paths {
            Some((bin, binfmt)) => provisioner.with_host_paths(bin, binfmt),
            None => provisioner,
        }
    }

    /// Provision the tree described by the configuration.
    ///
    /// Any failure aborts the run and leaves the tree as it is; `destroy`
    /// (once written) cleans up mounts.
    pub fn run(&self, packages: &mut dyn HostPackages) -> Result<Installed> {
        let config = self.config;
        let target = &config.target_dir;

        require_root(self.host)?;
        config.validate()?;
        let _lock = ProvisionLock::acquire(&config.temp_dir)?;

        if target.join("etc/alpine-release").exists() {
            bail!("{} already contains Alpine Linux", target.display());
        }

        let machine = self.host.machine()?;
        let emulation = EmulationPlan::decide(config.arch.as_deref(), &machine);
        info!("Host architecture {}, target {}", machine, emulation);

        let provisioner = match &emulation {
            EmulationPlan::Native => None,
            EmulationPlan::Emulated { arch } => Some(self.provisioner(arch)),
        };
        if let Some(provisioner) = &provisioner {
            provisioner.ensure_host_support(self.host, packages)?;
        }

        fs::create_dir_all(target)
            .with_context(|| format!("Failed to create {}", target.display()))?;

        let apk = self.fetcher.download(
            &config.apk_tools_uri,
            &config.apk_tools_sha256,
            &config.temp_dir,
        )?;
        fs::set_permissions(&apk, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("Failed to make {} executable", apk.display()))?;

        if let Some(provisioner) = &provisioner {
            let staged = provisioner.stage_interpreter(target)?;
            info!("Staged {}", staged.display());
        }

        let mut bootstrapper =
            PackageBootstrapper::new(self.host, &apk, target, config.arch.as_deref());
        if let Some(resolv_conf) = &self.resolv_conf {
            bootstrapper = bootstrapper.with_resolv_conf(resolv_conf);
        }
        bootstrapper.write_repositories(&config.mirrors, &config.branch, &config.extra_repos)?;
        bootstrapper.install_keys()?;
        bootstrapper.copy_resolv_conf()?;
        bootstrapper.init_base()?;
        bootstrapper.ensure_release_files(&config.branch, &config.temp_dir)?;

        let mount_plan = MountPlan::standard(config.bind_dir.as_deref());
        let emulator = emulation.interpreter();
        let [enter, destroy] = write_scripts(
            target,
            &enter_script(&mount_plan, &config.env_filter()?, emulator.as_deref()),
            &destroy_script(),
        )?;

        Binder::new(self.host).bind(target, &mount_plan)?;
        bootstrapper.install_packages(&config.packages)?;

        info!(
            "Alpine Linux chroot is ready in {}. Run {} to enter it and {} to tear it down",
            target.display(),
            enter.display(),
            destroy.display()
        );

        Ok(Installed {
            target_dir: target.clone(),
            enter_script: enter,
            destroy_script: destroy,
            emulation,
        })
    }
}
