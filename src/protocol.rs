//! Capability protocols.
//!
//! A protocol is a contract a driver fulfils and that strategies and other
//! drivers depend on. Drivers declare the protocols they implement
//! ([`Driver::protocols`](crate::Driver::protocols)) and expose each one
//! through the matching `as_*` accessor. Bindings and activation conflicts
//! are resolved on the [`Protocol`] tags alone.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::console::{Match, Pattern};
use crate::error::Result;

/// Tags of the capability contracts known to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Console,
    Power,
    Bootloader,
    Command,
    Shell,
    Storage,
    FileProvider,
}
impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Console => "ConsoleProtocol",
            Protocol::Power => "PowerProtocol",
            Protocol::Bootloader => "BootloaderProtocol",
            Protocol::Command => "CommandProtocol",
            Protocol::Shell => "ShellProtocol",
            Protocol::Storage => "StorageProtocol",
            Protocol::FileProvider => "FileProviderProtocol",
        };
        f.write_str(name)
    }
}

/// Send text and wait for patterns on a console.
pub trait ConsoleProtocol {
    /// Write `text` as is.
    fn write(&mut self, text: &str) -> Result<()>;

    /// Write `line` followed by a line terminator.
    fn sendline(&mut self, line: &str) -> Result<()>;

    /// Block until one of `patterns` appears, or fail with a timeout.
    fn expect(&mut self, patterns: &[Pattern], timeout: Duration) -> Result<Match>;
}

/// Switch the board supply.
pub trait PowerProtocol {
    fn on(&mut self) -> Result<()>;
    fn off(&mut self) -> Result<()>;
    /// Off then on again.
    fn cycle(&mut self) -> Result<()>;
    fn get(&mut self) -> Result<bool>;
}

/// Talk to a bootloader sitting at its prompt.
pub trait BootloaderProtocol {
    /// Continue booting, `name` selects a boot target when non-empty.
    fn boot(&mut self, name: &str) -> Result<()>;

    /// Wait until the bootloader has handed over to the operating system.
    fn await_boot(&mut self) -> Result<()>;
}

/// Output and exit status of a command run on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub exit_code: i32,
}

/// Run commands on the board.
pub trait CommandProtocol {
    /// Run `cmd` and collect its output, whatever its exit status.
    fn run(&mut self, cmd: &str, timeout: Option<Duration>) -> Result<CommandOutput>;

    /// Run `cmd` and fail with an execution error on a non-zero exit status.
    fn run_check(&mut self, cmd: &str, timeout: Option<Duration>) -> Result<Vec<String>> {
        let output = self.run(cmd, timeout)?;
        if output.exit_code != 0 {
            return Err(crate::Error::Execution(format!(
                "`{}` exited with {}: {}",
                cmd,
                output.exit_code,
                output.stdout.join("\n")
            )));
        }
        Ok(output.stdout)
    }
}

/// How an image is copied to a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Plain block copy (`dd`).
    RawBlockCopy,
    /// Copy only the mapped blocks (`bmaptool`).
    BlockMapCopy,
}

/// Where and how to write an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest<'a> {
    pub image: &'a Path,
    pub mode: WriteMode,
    /// Write to this partition instead of the whole device.
    pub partition: Option<u32>,
    /// 512-byte blocks skipped at the start of the image.
    pub skip_blocks: u64,
    /// 512-byte blocks skipped at the start of the device.
    pub seek_blocks: u64,
}
impl<'a> WriteRequest<'a> {
    /// A raw copy of `image` to the whole device.
    pub fn new(image: &'a Path) -> Self {
        WriteRequest {
            image,
            mode: WriteMode::RawBlockCopy,
            partition: None,
            skip_blocks: 0,
            seek_blocks: 0,
        }
    }
}

/// Write images to board storage.
pub trait StorageProtocol {
    fn write_image(&mut self, request: &WriteRequest<'_>) -> Result<()>;

    /// Size of the device in bytes.
    fn get_size(&mut self) -> Result<u64>;
}

/// Make host files reachable from the board.
pub trait FileProviderProtocol {
    /// Publish `path` and return the location the board uses to fetch it.
    fn stage(&mut self, path: &Path) -> Result<String>;
}
