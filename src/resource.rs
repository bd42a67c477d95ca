//! Resources: handles to the I/O endpoints of one board.
//!
//! A resource only describes where and how to reach an endpoint. Drivers read
//! it; the owning [`Target`](crate::Target) is the only one flipping its
//! availability, through `detect`/`undetect`.

use std::cell::Cell;
use std::fmt;
use std::path::PathBuf;

use crate::settings::SerialSettings;

/// Serving protocol of a network share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareProvider {
    Tftp,
    Nfs,
    Http,
}

/// What an endpoint is, with its backend specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceKind {
    /// A console on a local serial port.
    SerialPort(SerialSettings),
    /// One outlet of a network controlled power switch.
    PowerOutlet {
        /// Backend model registered in the [`Registry`](crate::Registry).
        model: String,
        host: String,
        port: Option<u16>,
        index: u32,
    },
    /// A block device on the board, e.g. `mmcblk0`.
    BlockDevice { name: String },
    /// A directory on this host served to the board.
    NetworkShare {
        provider: ShareProvider,
        /// Local directory files are placed in.
        internal: PathBuf,
        /// The same directory as seen from the board.
        external: String,
        use_symlink: bool,
    },
}
impl ResourceKind {
    pub fn class(&self) -> ResourceClass {
        match self {
            ResourceKind::SerialPort(_) => ResourceClass::SerialPort,
            ResourceKind::PowerOutlet { .. } => ResourceClass::PowerOutlet,
            ResourceKind::BlockDevice { .. } => ResourceClass::BlockDevice,
            ResourceKind::NetworkShare { .. } => ResourceClass::NetworkShare,
        }
    }
}

/// Resource kinds without their parameters, as named in driver bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    SerialPort,
    PowerOutlet,
    BlockDevice,
    NetworkShare,
}
impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceClass::SerialPort => "SerialPort",
            ResourceClass::PowerOutlet => "PowerOutlet",
            ResourceClass::BlockDevice => "BlockDevice",
            ResourceClass::NetworkShare => "NetworkShare",
        };
        f.write_str(name)
    }
}

/// A named endpoint with its availability.
#[derive(Debug)]
pub struct Resource {
    name: String,
    kind: ResourceKind,
    available: Cell<bool>,
}
impl Resource {
    /// A static resource, always reachable.
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Resource {
            name: name.into(),
            kind,
            available: Cell::new(true),
        }
    }

    /// A resource that comes and goes (USB adapters...), unavailable until
    /// its target detects it.
    pub fn managed(name: impl Into<String>, kind: ResourceKind) -> Self {
        Resource {
            available: Cell::new(false),
            ..Resource::new(name, kind)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn is_available(&self) -> bool {
        self.available.get()
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.set(available);
    }
}
