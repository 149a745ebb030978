//! Checksum-verified downloads.
//!
//! The package manager binary is fetched from the network and later runs as
//! root, so it is only handed out after its SHA-256 digest matched. Transfers
//! go through whichever of `curl` or `wget` the host provides; the choice is
//! made once, when the [`Fetcher`] is built.

use sha2::{Digest, Sha256};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

/// Upper bound for establishing a connection to a mirror.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const DIGEST_HEX_LEN: usize = 64;

/// Errors arising from fetching or verifying an artifact.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Neither supported transport is installed.
    #[error("neither curl nor wget is available; install one of them")]
    NoTransport,

    /// The transport exited unsuccessfully.
    #[error("download of {uri} with {transport} failed: {reason}")]
    Transfer {
        uri: String,
        transport: &'static str,
        reason: String,
    },

    /// The URI has no usable file name component.
    #[error("cannot derive a file name from {0}")]
    InvalidUri(String),

    /// Content digest differs from the expected one. Never retried.
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    DigestMismatch {
        path: PathBuf,
        expected: Sha256Digest,
        actual: String,
    },

    #[error("invalid SHA-256 digest: {reason}")]
    InvalidDigest { reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> FetchError + '_ {
        move |source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A validated lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Sha256Digest {
    type Error = FetchError;

    fn try_from(value: &str) -> Result<Self, FetchError> {
        let value = value.trim();
        if value.len() != DIGEST_HEX_LEN {
            return Err(FetchError::InvalidDigest {
                reason: format!(
                    "expected {DIGEST_HEX_LEN} hex characters, got {}",
                    value.len()
                ),
            });
        }
        if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(FetchError::InvalidDigest {
                reason: format!("non-hex character '{bad}'"),
            });
        }
        Ok(Self(value.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = FetchError;

    fn try_from(value: String) -> Result<Self, FetchError> {
        Self::try_from(value.as_str())
    }
}

impl std::str::FromStr for Sha256Digest {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, FetchError> {
        Self::try_from(s)
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the lowercase hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String, FetchError> {
    let mut file = File::open(path).map_err(FetchError::io(path))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(FetchError::io(path))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// A way of retrieving a URI into a local file.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    fn name(&self) -> &'static str;

    /// Retrieve `uri` into `dest`, overwriting it.
    fn fetch(&self, uri: &str, dest: &Path) -> Result<(), FetchError>;
}

/// `curl` transport.
#[derive(Debug, Clone)]
pub struct Curl {
    program: PathBuf,
}

/// `wget` transport.
#[derive(Debug, Clone)]
pub struct Wget {
    program: PathBuf,
}

fn run_transport(
    transport: &'static str,
    uri: &str,
    command: &mut Command,
) -> Result<(), FetchError> {
    let output = command.output().map_err(|e| FetchError::Transfer {
        uri: uri.to_string(),
        transport,
        reason: e.to_string(),
    })?;
    if output.status.success() {
        return Ok(());
    }
    Err(FetchError::Transfer {
        uri: uri.to_string(),
        transport,
        reason: format!(
            "exit code {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    })
}

impl Transport for Curl {
    fn name(&self) -> &'static str {
        "curl"
    }

    fn fetch(&self, uri: &str, dest: &Path) -> Result<(), FetchError> {
        let timeout = CONNECT_TIMEOUT.as_secs().to_string();
        run_transport(
            self.name(),
            uri,
            Command::new(&self.program)
                .args(["--connect-timeout", &timeout])
                .args(["--fail", "--silent", "--show-error", "--location"])
                .arg("--output")
                .arg(dest)
                .arg(uri),
        )
    }
}

impl Transport for Wget {
    fn name(&self) -> &'static str {
        "wget"
    }

    fn fetch(&self, uri: &str, dest: &Path) -> Result<(), FetchError> {
        run_transport(
            self.name(),
            uri,
            Command::new(&self.program)
                .arg(format!("--timeout={}", CONNECT_TIMEOUT.as_secs()))
                .arg("--quiet")
                .arg("-O")
                .arg(dest)
                .arg(uri),
        )
    }
}

/// Pick a transport from the executables on `PATH`: `curl`, then `wget`.
pub fn detect_transport() -> Result<Box<dyn Transport>, FetchError> {
    let path = std::env::var_os("PATH").unwrap_or_else(OsString::new);
    detect_transport_in(&path)
}

/// Like [`detect_transport`] with an explicit search path.
pub fn detect_transport_in(search_path: &OsStr) -> Result<Box<dyn Transport>, FetchError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    if let Ok(program) = which::which_in("curl", Some(search_path), &cwd) {
        return Ok(Box::new(Curl { program }));
    }
    if let Ok(program) = which::which_in("wget", Some(search_path), &cwd) {
        return Ok(Box::new(Wget { program }));
    }
    Err(FetchError::NoTransport)
}

/// File name component of a URI path, ignoring query and fragment.
pub fn uri_basename(uri: &str) -> Option<&str> {
    let path = uri.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?;
    if name.is_empty() || name == "." || name == ".." || path.ends_with(':') {
        return None;
    }
    Some(name)
}

/// Fetches artifacts through one transport.
pub struct Fetcher {
    transport: Box<dyn Transport>,
}

impl Fetcher {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Build a fetcher over the transport found on the host.
    pub fn detect() -> Result<Self, FetchError> {
        let transport = detect_transport()?;
        debug!("using {} for downloads", transport.name());
        Ok(Self::new(transport))
    }

    /// Retrieve `uri` to `dest` without verification.
    pub fn fetch(&self, uri: &str, dest: &Path) -> Result<(), FetchError> {
        self.transport.fetch(uri, dest)
    }

    /// Download `uri` into `dest_dir` and verify it against `expected`.
    ///
    /// On mismatch the file is deleted and [`FetchError::DigestMismatch`]
    /// is returned.
    pub fn download(
        &self,
        uri: &str,
        expected: &Sha256Digest,
        dest_dir: &Path,
    ) -> Result<PathBuf, FetchError> {
        let name = uri_basename(uri).ok_or_else(|| FetchError::InvalidUri(uri.to_string()))?;
        fs::create_dir_all(dest_dir).map_err(FetchError::io(dest_dir))?;

        let dest = dest_dir.join(name);
        if dest.symlink_metadata().is_ok() {
            fs::remove_file(&dest).map_err(FetchError::io(&dest))?;
        }

        info!("Downloading {}", uri);
        let fetched = self.transport.fetch(uri, &dest);
        if let Err(err) = fetched {
            // a partial transfer must not be mistaken for the artifact
            let _ = fs::remove_file(&dest);
            return Err(err);
        }

        let actual = sha256_file(&dest)?;
        if actual != expected.as_str() {
            let _ = fs::remove_file(&dest);
            return Err(FetchError::DigestMismatch {
                path: dest,
                expected: expected.clone(),
                actual,
            });
        }

        debug!("{} verified ({})", dest.display(), actual);
        Ok(dest)
    }
}
