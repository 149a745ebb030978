//! Recording [`Host`] for tests.

use super::{Host, Mount};
use crate::process::Cmd;
use anyhow::{bail, Result};
use std::cell::RefCell;
use std::path::{Path, PathBuf};

/// One observable interaction with the fake host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Mount(Mount),
    Private(PathBuf, bool),
    Run(Cmd),
}

pub(crate) struct FakeHost {
    pub(crate) root: bool,
    pub(crate) machine: String,
    pub(crate) mounted: RefCell<Vec<PathBuf>>,
    pub(crate) events: RefCell<Vec<Event>>,
    /// Program names whose invocation fails.
    pub(crate) failing: Vec<String>,
    /// Runs before a command is recorded; lets tests emulate side effects.
    pub(crate) on_run: Option<Box<dyn Fn(&Cmd)>>,
}

impl FakeHost {
    pub(crate) fn new(machine: &str) -> Self {
        Self {
            root: true,
            machine: machine.to_string(),
            mounted: RefCell::new(Vec::new()),
            events: RefCell::new(Vec::new()),
            failing: Vec::new(),
            on_run: None,
        }
    }

    pub(crate) fn mounts(&self) -> Vec<PathBuf> {
        self.mounted.borrow().clone()
    }

    pub(crate) fn commands(&self) -> Vec<Cmd> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Run(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Commands rendered as strings with the program reduced to its file name.
    pub(crate) fn command_lines(&self) -> Vec<String> {
        self.commands()
            .iter()
            .map(|c| {
                let mut parts = vec![c.name()];
                parts.extend(c.get_args().iter().cloned());
                parts.join(" ")
            })
            .collect()
    }
}

impl Host for FakeHost {
    fn is_root(&self) -> bool {
        self.root
    }

    fn machine(&self) -> Result<String> {
        Ok(self.machine.clone())
    }

    fn mount_points(&self) -> Result<Vec<PathBuf>> {
        Ok(self.mounts())
    }

    fn mount(&self, mount: &Mount) -> Result<()> {
        if !mount.target().is_dir() {
            bail!("mount point does not exist: {}", mount.target().display());
        }
        self.mounted.borrow_mut().push(mount.target().to_path_buf());
        self.events.borrow_mut().push(Event::Mount(mount.clone()));
        Ok(())
    }

    fn make_private(&self, path: &Path, recursive: bool) -> Result<()> {
        if !self.mounted.borrow().iter().any(|p| p == path) {
            bail!("not a mount point: {}", path.display());
        }
        self.events
            .borrow_mut()
            .push(Event::Private(path.to_path_buf(), recursive));
        Ok(())
    }

    fn run(&self, cmd: &Cmd) -> Result<()> {
        if self.failing.contains(&cmd.name()) {
            bail!("'{}' failed (exit code 1)", cmd.name());
        }
        if let Some(hook) = &self.on_run {
            hook(cmd);
        }
        self.events.borrow_mut().push(Event::Run(cmd.clone()));
        Ok(())
    }
}
