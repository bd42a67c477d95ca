//! Network power switch backends.
//!
//! A backend switches one outlet of a power distribution unit. Outlets are
//! numbered from 1; every backend has a fixed outlet count and [`power_set`]
//! and [`power_get`] refuse indices outside of it before talking to the
//! device.

mod apc;

use std::collections::BTreeMap;
use std::process::Command;
use std::rc::Rc;

use log::debug;

use crate::error::{Error, Result};

pub use apc::ApcRpdu;

/// A model of network power switch.
pub trait PowerBackend {
    /// Highest valid outlet index.
    fn max_index(&self) -> u32;

    /// Switch outlet `index` of the switch at `host`.
    fn set(&self, host: &str, port: Option<u16>, index: u32, on: bool) -> Result<()>;

    /// Whether outlet `index` of the switch at `host` is powered.
    fn get(&self, host: &str, port: Option<u16>, index: u32) -> Result<bool>;
}

fn check_index(backend: &dyn PowerBackend, index: u32) -> Result<()> {
    let max = backend.max_index();
    if index < 1 || index > max {
        return Err(Error::OutOfRange { index, max });
    }
    Ok(())
}

/// Switch an outlet after validating its index.
pub fn power_set(
    backend: &dyn PowerBackend,
    host: &str,
    port: Option<u16>,
    index: u32,
    on: bool,
) -> Result<()> {
    check_index(backend, index)?;
    backend.set(host, port, index, on)
}

/// Read an outlet after validating its index.
pub fn power_get(backend: &dyn PowerBackend, host: &str, port: Option<u16>, index: u32) -> Result<bool> {
    check_index(backend, index)?;
    backend.get(host, port, index)
}

/// Power switch backends by model name, as named in
/// [`PowerOutlet`](crate::ResourceKind::PowerOutlet) resources.
#[derive(Default, Clone)]
pub struct PowerBackends {
    models: BTreeMap<String, Rc<dyn PowerBackend>>,
}
impl PowerBackends {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backends shipped with the crate: `apc`.
    pub fn with_builtins() -> Self {
        let mut backends = Self::new();
        backends
            .models
            .insert("apc".to_string(), Rc::new(ApcRpdu::new()));
        backends
    }

    pub fn register(&mut self, model: &str, backend: Rc<dyn PowerBackend>) -> Result<()> {
        if self.models.contains_key(model) {
            return Err(Error::Configuration(format!(
                "power backend `{}` is already registered",
                model
            )));
        }
        self.models.insert(model.to_string(), backend);
        Ok(())
    }

    pub fn get(&self, model: &str) -> Result<Rc<dyn PowerBackend>> {
        self.models.get(model).cloned().ok_or_else(|| {
            Error::Configuration(format!(
                "unknown power backend `{}`, known: {}",
                model,
                self.models().join(", ")
            ))
        })
    }

    pub fn models(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }
}

// =============================================================================
// External Tools
// =============================================================================

/// Runs the external tools backends talk to their devices with.
pub trait CommandRunner {
    /// Run `program` with `args` and return its standard output. A non-zero
    /// exit status is an execution error.
    fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// Runs commands as local processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;
impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String> {
        debug!("running {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::Execution(format!("failed to run {}: {}", program, e)))?;
        if !output.status.success() {
            return Err(Error::Execution(format!(
                "{} failed ({}): {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
