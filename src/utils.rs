//! Helper functions to deal with serial ports and the terminal.

mod keyboard;
mod ports;

pub(crate) use ports::open_and_setup_port;
pub use ports::{port_present, select_port, wait_for_port, PortWait};
