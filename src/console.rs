//! Line oriented console channel with pattern-match-with-timeout semantics.
//!
//! A [`ConsoleTransport`] moves raw bytes; a [`Session`] layers the blocking
//! `send`/`expect` primitive on top of it:
//!
//! ```
//! use std::time::Duration;
//! use hutctl::console::{Pattern, ScriptedTransport, Session};
//!
//! let transport = ScriptedTransport::new().on("uname", "Linux\nroot@board:~# ");
//! let mut session = Session::new(Box::new(transport));
//! session.sendline("uname").unwrap();
//! let found = session
//!     .expect(&[Pattern::from("Linux"), Pattern::Eof], Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(found.index, 0);
//! ```

mod expect;
mod scripted;
mod serial;

use std::time::Duration;

use crate::error::Result;
use crate::settings::SerialSettings;

pub use expect::{Match, Pattern, Session};
pub use scripted::ScriptedTransport;
pub use serial::{SerialOpener, SerialTransport};

/// Outcome of a single [`ConsoleTransport::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Some bytes arrived.
    Data(Vec<u8>),
    /// The stream is closed and nothing more will arrive.
    Eof,
    /// Nothing arrived during the whole timeout.
    Idle,
}

/// Raw byte channel to a console.
pub trait ConsoleTransport {
    /// Write all of `data` to the console.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Wait at most `timeout` for bytes. Returns as soon as anything arrives.
    fn read(&mut self, timeout: Duration) -> Result<Received>;
}

/// Opens transports for serial port resources. Registered once in the
/// [`Registry`](crate::Registry) and handed to every console driver.
pub trait TransportOpener {
    fn open(&self, settings: &SerialSettings) -> Result<Box<dyn ConsoleTransport>>;
}
