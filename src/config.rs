//! Provisioning configuration.
//!
//! [`Settings`] is the partially specified form coming from a TOML file, the
//! environment or the command line; layers are merged with
//! [`Settings::merge`] and then resolved into an immutable [`Config`].

use crate::fetch::Sha256Digest;
use crate::script::EnvFilter;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_BRANCH: &str = "latest-stable";
pub const DEFAULT_TARGET_DIR: &str = "/alpine";
pub const DEFAULT_MIRROR: &str = "http://dl-cdn.alpinelinux.org/alpine";
pub const DEFAULT_KEEP_VARS: &[&str] = &["ARCH", "CI", "QEMU_EMULATOR", "TRAVIS_.*"];
pub const DEFAULT_PACKAGES: &[&str] = &["build-base", "ca-certificates", "ssl_client"];

/// apk-tools release used for the default download URI.
pub const APK_TOOLS_VERSION: &str = "v2.14.4";

/// Errors from resolving settings into a [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be an absolute path, got '{}'", path.display())]
    RelativePath { field: &'static str, path: PathBuf },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} is required (no default is shipped)")]
    Missing(&'static str),
}

/// Fully resolved configuration. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Requested target architecture; `None` means the host's.
    pub arch: Option<String>,
    /// Alpine branch, e.g. `latest-stable`, `edge` or `v3.20`.
    pub branch: String,
    /// Absolute path of the target tree.
    pub target_dir: PathBuf,
    /// Host directory bound at the same path inside the tree.
    pub bind_dir: Option<PathBuf>,
    /// Environment variable name patterns kept by `enter-chroot`.
    pub keep_vars: Vec<String>,
    /// Mirror base URIs; each contributes `main` and `community`.
    pub mirrors: Vec<String>,
    pub packages: Vec<String>,
    pub extra_repos: Vec<String>,
    /// Scratch directory for downloads.
    pub temp_dir: PathBuf,
    pub apk_tools_uri: String,
    pub apk_tools_sha256: Sha256Digest,
}

impl Config {
    /// The environment filter built from `keep_vars`.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::new(&self.keep_vars)
    }

    /// Check the invariants every consumer relies on.
    pub fn validate(&self) -> Result<()> {
        require_absolute("target directory", &self.target_dir)?;
        if let Some(bind_dir) = &self.bind_dir {
            require_absolute("bind directory", bind_dir)?;
        }
        if self.branch.trim().is_empty() {
            return Err(ConfigError::Empty("branch").into());
        }
        if self.mirrors.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::Empty("mirror").into());
        }
        self.env_filter()
            .context("invalid environment variable pattern")?;
        Ok(())
    }
}

fn require_absolute(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(ConfigError::RelativePath {
            field,
            path: path.to_path_buf(),
        })
    }
}

/// Prefix bare version numbers with `v` (`3.20` becomes `v3.20`).
pub fn normalize_branch(branch: &str) -> String {
    let branch = branch.trim();
    if branch.starts_with(|c: char| c.is_ascii_digit()) {
        format!("v{}", branch)
    } else {
        branch.to_string()
    }
}

/// Default apk.static location for a host machine name.
pub fn default_apk_tools_uri(machine: &str) -> String {
    format!(
        "https://gitlab.alpinelinux.org/api/v4/projects/5/packages/generic/{}/{}/apk.static",
        APK_TOOLS_VERSION, machine
    )
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// One layer of optional settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub arch: Option<String>,
    pub branch: Option<String>,
    pub target_dir: Option<PathBuf>,
    pub bind_dir: Option<PathBuf>,
    pub keep_vars: Option<Vec<String>>,
    pub mirrors: Option<Vec<String>>,
    pub packages: Option<Vec<String>>,
    pub extra_repos: Option<Vec<String>>,
    pub temp_dir: Option<PathBuf>,
    pub apk_tools_uri: Option<String>,
    pub apk_tools_sha256: Option<String>,
}

impl Settings {
    /// Parse a TOML settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config '{}'", path.display()))
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: Settings) -> Settings {
        Settings {
            arch: other.arch.or(self.arch),
            branch: other.branch.or(self.branch),
            target_dir: other.target_dir.or(self.target_dir),
            bind_dir: other.bind_dir.or(self.bind_dir),
            keep_vars: other.keep_vars.or(self.keep_vars),
            mirrors: other.mirrors.or(self.mirrors),
            packages: other.packages.or(self.packages),
            extra_repos: other.extra_repos.or(self.extra_repos),
            temp_dir: other.temp_dir.or(self.temp_dir),
            apk_tools_uri: other.apk_tools_uri.or(self.apk_tools_uri),
            apk_tools_sha256: other.apk_tools_sha256.or(self.apk_tools_sha256),
        }
    }

    /// Fill in defaults and validate.
    ///
    /// `host_machine` selects the default apk.static download.
    pub fn resolve(self, host_machine: &str) -> Result<Config> {
        let digest = self
            .apk_tools_sha256
            .filter(|d| !d.trim().is_empty())
            .ok_or(ConfigError::Missing("apk-tools SHA-256"))?;
        let apk_tools_sha256 =
            Sha256Digest::try_from(digest.as_str()).context("invalid apk-tools SHA-256")?;

        let config = Config {
            arch: self
                .arch
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            branch: normalize_branch(self.branch.as_deref().unwrap_or(DEFAULT_BRANCH)),
            target_dir: self
                .target_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET_DIR)),
            bind_dir: self.bind_dir.filter(|p| !p.as_os_str().is_empty()),
            keep_vars: self.keep_vars.unwrap_or_else(|| owned(DEFAULT_KEEP_VARS)),
            mirrors: self
                .mirrors
                .unwrap_or_else(|| vec![DEFAULT_MIRROR.to_string()])
                .into_iter()
                .map(|m| m.trim_end_matches('/').to_string())
                .collect(),
            packages: self.packages.unwrap_or_else(|| owned(DEFAULT_PACKAGES)),
            extra_repos: self.extra_repos.unwrap_or_default(),
            temp_dir: self
                .temp_dir
                .unwrap_or_else(|| std::env::temp_dir().join("alpine-chroot")),
            apk_tools_uri: self
                .apk_tools_uri
                .unwrap_or_else(|| default_apk_tools_uri(host_machine)),
            apk_tools_sha256,
        };
        config.validate()?;
        Ok(config)
    }
}
