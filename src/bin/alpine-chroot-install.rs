use std::path::PathBuf;
use std::process::ExitCode;

use alpine_chroot::config::Settings;
use alpine_chroot::emulation::Apt;
use alpine_chroot::fetch::Fetcher;
use alpine_chroot::host::{Host, LinuxHost};
use alpine_chroot::install::Installer;
use alpine_chroot::preflight;
use anyhow::Result;
use clap::Parser;

/// Install an Alpine Linux chroot, optionally for a foreign architecture.
#[derive(Parser, Debug)]
#[command(name = "alpine-chroot-install", version)]
struct Cli {
    /// Target architecture (e.g. x86_64, aarch64, armhf); default is the host's
    #[arg(short = 'a', long, env = "ALPINE_ARCH")]
    arch: Option<String>,

    /// Alpine branch: latest-stable, edge or vX.Y
    #[arg(short = 'b', long, env = "ALPINE_BRANCH")]
    branch: Option<String>,

    /// Absolute path of the chroot directory
    #[arg(short = 'd', long = "dir", env = "CHROOT_DIR")]
    target_dir: Option<PathBuf>,

    /// Host directory bound at the same path inside the chroot
    #[arg(short = 'i', long, env = "BIND_DIR")]
    bind_dir: Option<PathBuf>,

    /// Environment variable name patterns passed into the chroot
    #[arg(short = 'k', long = "keep-vars", env = "CHROOT_KEEP_VARS", value_delimiter = ' ')]
    keep_vars: Option<Vec<String>>,

    /// Alpine mirror base URI (repeatable)
    #[arg(short = 'm', long = "mirror", env = "ALPINE_MIRROR", value_delimiter = ' ')]
    mirrors: Option<Vec<String>>,

    /// Packages to install into the chroot
    #[arg(short = 'p', long = "packages", env = "ALPINE_PACKAGES", value_delimiter = ' ')]
    packages: Option<Vec<String>>,

    /// Extra repository lines for etc/apk/repositories
    #[arg(short = 'r', long = "repo", env = "EXTRA_REPOS", value_delimiter = ' ')]
    extra_repos: Option<Vec<String>>,

    /// Scratch directory for downloads
    #[arg(short = 't', long = "temp-dir", env = "TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// apk.static download URI
    #[arg(long, env = "APK_TOOLS_URI")]
    apk_tools_uri: Option<String>,

    /// Expected SHA-256 of apk.static
    #[arg(long, env = "APK_TOOLS_SHA256")]
    apk_tools_sha256: Option<String>,

    /// TOML file with defaults; flags and environment take precedence
    #[arg(short = 'c', long, env = "ALPINE_CHROOT_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            arch: self.arch.clone(),
            branch: self.branch.clone(),
            target_dir: self.target_dir.clone(),
            bind_dir: self.bind_dir.clone(),
            keep_vars: self.keep_vars.clone(),
            mirrors: self.mirrors.clone(),
            packages: self.packages.clone(),
            extra_repos: self.extra_repos.clone(),
            temp_dir: self.temp_dir.clone(),
            apk_tools_uri: self.apk_tools_uri.clone(),
            apk_tools_sha256: self.apk_tools_sha256.clone(),
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let host = LinuxHost::new();
    preflight::require_root(&host)?;
    preflight::check_host_tools()?;

    let file = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let config = file.merge(cli.settings()).resolve(&host.machine()?)?;

    let fetcher = Fetcher::detect()?;
    let installed = Installer::new(&config, &host, fetcher).run(&mut Apt::new(&host))?;

    println!(
        "Alpine Linux chroot installed in {}.\n\
         Enter it with: {} [-u <user>] [command]\n\
         Tear it down with: {} [--remove]",
        installed.target_dir.display(),
        installed.enter_script.display(),
        installed.destroy_script.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
