//! Hutctl drives a hardware-under-test board through a fixed set of
//! operational states: powered off, sitting at the bootloader prompt, logged
//! into a Linux shell, rebooting or powering down. The board is usually only
//! reachable through a serial console and a power switch, so every state
//! change is a scripted dialogue with the console, bounded by timeouts.
//!
//! The crate is organised in three layers:
//!
//! * **Resources** describe the I/O endpoints of a board (a serial port, a
//!   power outlet, a block device, a network share). They carry parameters
//!   and an availability flag, nothing else.
//! * **Drivers** adapt resources, and other drivers, to capability
//!   **protocols** (console, power, bootloader, shell commands, storage,
//!   file provider). A [`Target`] owns the resources and drivers of one board
//!   and activates drivers exclusively: at most one active driver per
//!   protocol, suppliers up before their clients, clients down before their
//!   suppliers.
//! * A **strategy** is a state machine on top of a target. Each state is
//!   reached by first reaching its prerequisite state, then running a fixed
//!   list of steps. The status only moves forward once a whole hop succeeded,
//!   so a failed transition leaves it at the last state really reached.
//!
//! ```text
//!  Strategy ──transition(shell)──▶ off ──▶ bootloader ──▶ shell
//!     │                             │          │            │
//!     ▼                             ▼          ▼            ▼
//!  Target ──activate──▶ power driver, console driver, bootloader driver...
//!     │
//!     ▼
//!  Console session: send / expect with timeout
//! ```
//!
//! Nothing here runs concurrently. A transition blocks for its whole
//! duration; its only suspension points are console expectations and fixed
//! settle delays.

#[macro_use]
mod macros;

pub mod console;
pub mod driver;
pub mod power;
pub mod protocol;
pub mod registry;
pub mod resource;
pub mod strategy;

mod error;
mod settings;
mod target;
mod utils;

pub use driver::{Binding, Driver, DriverHandle, Requirement, Supplier};
pub use error::{Error, Result};
pub use power::{PowerBackend, PowerBackends};
pub use protocol::{
    BootloaderProtocol, CommandOutput, CommandProtocol, ConsoleProtocol, FileProviderProtocol,
    PowerProtocol, Protocol, StorageProtocol, WriteMode, WriteRequest,
};
pub use registry::Registry;
pub use resource::{Resource, ResourceClass, ResourceKind, ShareProvider};
pub use settings::{
    ChromiumEcConfig, DataBits, FlowControl, NetworkPowerConfig, Parity, SerialSettings,
    SerialSettingsBuilder, Settings, SettingsBuilder, ShellConfig, StopBits, StorageConfig,
    StrategyConfig, UBootConfig,
};
pub use strategy::{Status, Strategy, UBootStrategy};
pub use target::Target;
pub use utils::{port_present, select_port, wait_for_port, PortWait};
