//! Drivers: stateful adapters binding resources and other drivers to
//! capability protocols.
//!
//! A driver declares, as static data, which protocols it implements, which
//! binding slots it needs filled, and how strongly it wants to be picked for
//! each protocol. The [`Target`](crate::Target) resolves the slots, hands the
//! chosen suppliers to [`Driver::bind`] and runs the activation hooks. Callers
//! reach a driver's capabilities through its [`DriverHandle`], which refuses
//! access while the driver is inactive.
//!
//! ```text
//!   UBootStrategy ──power──────▶ ChromiumEcPowerDriver ──console──┐
//!        │  ├──────console────────────────────────────────────────┤
//!        │  ├──bootloader──▶ UBootDriver ──console─────────────────┤
//!        │  └──shell───────▶ ShellDriver ──console─────────────────┤
//!        │                                                          ▼
//!        │                                     SerialDriver ──port──▶ SerialPort
//! ```

mod chromium_ec;
mod network_power;
mod provider;
mod serial;
mod shell;
mod shell_storage;
mod uboot;

use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::protocol::{
    BootloaderProtocol, CommandProtocol, ConsoleProtocol, FileProviderProtocol, PowerProtocol,
    Protocol, StorageProtocol,
};
use crate::resource::{Resource, ResourceClass};

pub use chromium_ec::ChromiumEcPowerDriver;
pub use network_power::NetworkPowerDriver;
pub use provider::ProviderDriver;
pub use serial::SerialDriver;
pub use shell::ShellDriver;
pub use shell_storage::ShellStorageDriver;
pub use uboot::UBootDriver;

// =============================================================================
// Declarations
// =============================================================================

/// Something that can fill a binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Any driver implementing the protocol.
    Protocol(Protocol),
    /// Any available resource of the class.
    Resource(ResourceClass),
}
impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Protocol(p) => fmt::Display::fmt(p, f),
            Requirement::Resource(r) => fmt::Display::fmt(r, f),
        }
    }
}

/// A named slot and the requirements it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub slot: &'static str,
    pub accepts: &'static [Requirement],
}

/// What the target resolved a slot to.
#[derive(Debug, Clone)]
pub enum Supplier {
    Driver(DriverHandle),
    Resource(Rc<Resource>),
}
impl Supplier {
    pub fn name(&self) -> &str {
        match self {
            Supplier::Driver(driver) => driver.name(),
            Supplier::Resource(resource) => resource.name(),
        }
    }

    /// The supplier as a driver, for slots accepting protocols only.
    pub fn into_driver(self, slot: &str) -> Result<DriverHandle> {
        match self {
            Supplier::Driver(driver) => Ok(driver),
            Supplier::Resource(resource) => Err(Error::Binding(format!(
                "slot `{}` needs a driver, got resource `{}`",
                slot,
                resource.name()
            ))),
        }
    }

    /// The supplier as a resource, for slots accepting resources only.
    pub fn into_resource(self, slot: &str) -> Result<Rc<Resource>> {
        match self {
            Supplier::Resource(resource) => Ok(resource),
            Supplier::Driver(driver) => Err(Error::Binding(format!(
                "slot `{}` needs a resource, got driver `{}`",
                slot,
                driver.name()
            ))),
        }
    }
}

/// Error for a supplier offered to a slot the driver does not declare.
pub(crate) fn unknown_slot(kind: &str, slot: &str) -> Error {
    Error::Binding(format!("{} has no binding slot `{}`", kind, slot))
}

/// Error for a capability used before the driver was bound.
pub(crate) fn unbound(kind: &str, slot: &str) -> Error {
    Error::Binding(format!("{} slot `{}` is not bound", kind, slot))
}

/// A stateful adapter implementing capability protocols.
///
/// Implementations only expose the `as_*` accessors for the protocols listed
/// in [`protocols`](Driver::protocols).
pub trait Driver {
    /// Type name, used in logs and by the [`Registry`](crate::Registry).
    fn kind(&self) -> &'static str;

    fn protocols(&self) -> &'static [Protocol];

    fn bindings(&self) -> &'static [Binding];

    /// Preference when several drivers implement `protocol`; higher wins.
    fn priority(&self, _protocol: Protocol) -> i32 {
        0
    }

    /// Receive the supplier resolved for `slot`, right before activation.
    fn bind(&mut self, slot: &str, supplier: Supplier) -> Result<()>;

    /// Bring the driver up; may talk to the hardware.
    fn on_activate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Bring the driver up assuming the hardware is already where the driver
    /// needs it, without any dialogue with the board.
    fn on_adopt(&mut self) -> Result<()> {
        self.on_activate()
    }

    /// Release the driver. Never called on an inactive driver.
    fn on_deactivate(&mut self) -> Result<()> {
        Ok(())
    }

    fn as_console(&mut self) -> Option<&mut dyn ConsoleProtocol> {
        None
    }

    fn as_power(&mut self) -> Option<&mut dyn PowerProtocol> {
        None
    }

    fn as_bootloader(&mut self) -> Option<&mut dyn BootloaderProtocol> {
        None
    }

    fn as_command(&mut self) -> Option<&mut dyn CommandProtocol> {
        None
    }

    fn as_storage(&mut self) -> Option<&mut dyn StorageProtocol> {
        None
    }

    fn as_file_provider(&mut self) -> Option<&mut dyn FileProviderProtocol> {
        None
    }
}

// =============================================================================
// Handles
// =============================================================================

struct DriverCell {
    name: String,
    kind: &'static str,
    /// Declaration order on the owning target.
    index: usize,
    protocols: &'static [Protocol],
    bindings: &'static [Binding],
    priorities: Vec<(Protocol, i32)>,
    active: Cell<bool>,
    driver: RefCell<Box<dyn Driver>>,
}

/// Shared handle to a driver registered on a target.
#[derive(Clone)]
pub struct DriverHandle(Rc<DriverCell>);
impl DriverHandle {
    pub(crate) fn new(name: String, index: usize, driver: Box<dyn Driver>) -> Self {
        let protocols = driver.protocols();
        let priorities = protocols
            .iter()
            .map(|p| (*p, driver.priority(*p)))
            .collect();
        DriverHandle(Rc::new(DriverCell {
            name,
            kind: driver.kind(),
            index,
            protocols,
            bindings: driver.bindings(),
            priorities,
            active: Cell::new(false),
            driver: RefCell::new(driver),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &'static str {
        self.0.kind
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    pub fn protocols(&self) -> &'static [Protocol] {
        self.0.protocols
    }

    pub fn bindings(&self) -> &'static [Binding] {
        self.0.bindings
    }

    pub fn provides(&self, protocol: Protocol) -> bool {
        self.0.protocols.contains(&protocol)
    }

    /// Declared priority for `protocol`, zero when not declared.
    pub fn priority(&self, protocol: Protocol) -> i32 {
        self.0
            .priorities
            .iter()
            .find(|(p, _)| *p == protocol)
            .map_or(0, |(_, priority)| *priority)
    }

    pub(crate) fn index(&self) -> usize {
        self.0.index
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.0.active.set(active);
    }

    pub(crate) fn borrow_driver(&self) -> Result<RefMut<'_, Box<dyn Driver>>> {
        self.0.driver.try_borrow_mut().map_err(|_| {
            Error::Configuration(format!(
                "driver `{}` was re-entered through its own bindings",
                self.name()
            ))
        })
    }

    capability_accessor!(
        /// Use the console capability of an active driver.
        with_console,
        as_console,
        ConsoleProtocol
    );
    capability_accessor!(
        /// Use the power capability of an active driver.
        with_power,
        as_power,
        PowerProtocol
    );
    capability_accessor!(
        /// Use the bootloader capability of an active driver.
        with_bootloader,
        as_bootloader,
        BootloaderProtocol
    );
    capability_accessor!(
        /// Use the command capability of an active driver.
        with_command,
        as_command,
        CommandProtocol
    );
    capability_accessor!(
        /// Use the storage capability of an active driver.
        with_storage,
        as_storage,
        StorageProtocol
    );
    capability_accessor!(
        /// Use the file provider capability of an active driver.
        with_file_provider,
        as_file_provider,
        FileProviderProtocol
    );
}
impl PartialEq for DriverHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for DriverHandle {}
impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverHandle")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .field("active", &self.is_active())
            .finish()
    }
}
impl fmt::Display for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.0.kind, self.0.name)
    }
}

/// Resolve a slot of a concrete driver to the driver handle it received,
/// naming the slot in the error.
pub(crate) fn bound<'a>(
    handle: &'a Option<DriverHandle>,
    kind: &str,
    slot: &str,
) -> Result<&'a DriverHandle> {
    handle.as_ref().ok_or_else(|| unbound(kind, slot))
}
