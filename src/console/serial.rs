//! Console transport over a local serial port.

use std::fmt;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use hexplay::HexViewBuilder;
use log::{debug, log_enabled, trace, Level::Debug};
use serialport::SerialPort;

use super::{ConsoleTransport, Received, TransportOpener};
use crate::error::Result;
use crate::settings::SerialSettings;
use crate::utils::open_and_setup_port;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A serial port, already configured and open.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}
impl SerialTransport {
    pub fn open(settings: &SerialSettings) -> Result<Self> {
        Ok(SerialTransport {
            port: open_and_setup_port(settings)?,
        })
    }
}
impl ConsoleTransport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Received> {
        let started = Instant::now();
        loop {
            // Only read what is already buffered so that the read call never
            // blocks past the requested timeout.
            let available = match self.port.bytes_to_read() {
                Ok(available) => available,
                Err(ref e) if e.kind() == serialport::ErrorKind::NoDevice => {
                    debug!("serial device went away: {}", e);
                    return Ok(Received::Eof);
                }
                Err(e) => return Err(e.into()),
            };
            trace!("Bytes available to read: {}", available);

            if available > 0 {
                // We'll read 4K maximum each time
                let mut serial_buf: Vec<u8> = vec![0; std::cmp::min(available, 4096) as usize];
                match self.port.read(serial_buf.as_mut_slice()) {
                    Ok(0) => return Ok(Received::Eof),
                    Ok(t) => {
                        serial_buf.truncate(t);
                        // Dump the received data in a hex table for debugging
                        if log_enabled!(Debug) {
                            let view = HexViewBuilder::new(&serial_buf)
                                .address_offset(0)
                                .row_width(16)
                                .finish();
                            debug!("\n{}", view);
                        }
                        return Ok(Received::Data(serial_buf));
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {}
                    Err(ref e) if e.kind() == io::ErrorKind::BrokenPipe => {
                        return Ok(Received::Eof)
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(Received::Idle);
            }
            thread::sleep(std::cmp::min(POLL_INTERVAL, timeout - elapsed));
        }
    }
}
impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = &self.port;
        debug_fmt_serialport!(port, f).finish()
    }
}

/// Opens [`SerialTransport`]s; the default opener of the registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;
impl TransportOpener for SerialOpener {
    fn open(&self, settings: &SerialSettings) -> Result<Box<dyn super::ConsoleTransport>> {
        Ok(Box::new(SerialTransport::open(settings)?))
    }
}
