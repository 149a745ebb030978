//! Provision an Alpine Linux chroot on a Linux host.
//!
//! The tree is built with a checksum-verified `apk.static`, optionally for a
//! foreign architecture through QEMU user-mode emulation, and gets two helper
//! scripts at its root:
//!
//! - **`enter-chroot`** - restores mounts if needed and runs a command inside
//! - **`destroy`** - unmounts everything below the tree and optionally removes it
//!
//! # Architecture
//!
//! ```text
//! install::Installer
//!     │
//!     ├── preflight, lock         root check, one run per scratch dir
//!     ├── arch, emulation         native or QEMU, host support, staging
//!     ├── fetch                   curl/wget + SHA-256
//!     ├── bootstrap, keys         repositories, trust anchors, base system
//!     ├── script                  enter-chroot / destroy as structured steps
//!     └── namespace               proc, sys, dev, shm, bind dir
//!
//! host::Host                      mounts, processes, uname (faked in tests)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use alpine_chroot::config::Settings;
//! use alpine_chroot::emulation::Apt;
//! use alpine_chroot::fetch::Fetcher;
//! use alpine_chroot::host::{Host, LinuxHost};
//! use alpine_chroot::install::Installer;
//!
//! let host = LinuxHost::new();
//! let config = Settings::load("alpine.toml".as_ref())?.resolve(&host.machine()?)?;
//! Installer::new(&config, &host, Fetcher::detect()?).run(&mut Apt::new(&host))?;
//! ```

pub mod arch;
pub mod bootstrap;
pub mod config;
pub mod emulation;
pub mod fetch;
pub mod host;
pub mod install;
pub mod keys;
pub mod lock;
pub mod namespace;
pub mod preflight;
pub mod process;
pub mod script;

pub use config::{Config, Settings};
pub use install::{Installed, Installer};
