//! Serial port discovery, waiting and opening.

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use serialport::{available_ports, SerialPort, SerialPortType};

use std::{
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::Duration,
};

use super::keyboard::{poll_key, KeyPress};
use crate::error::{Error, Result};
use crate::settings::SerialSettings;

//==============================================================================
// Public Interface
//==============================================================================

/// How a [`wait_for_port`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortWait {
    /// The port showed up on the system.
    Ready,
    /// The user pressed `ESC`.
    Cancelled,
    /// The user pressed `Ctrl+C`.
    Interrupted,
}

/// Let the user pick one of the serial ports present on the system, waiting
/// until at least one is connected. Returns `None` when the user cancels the
/// selection, so the caller can refresh and ask again.
pub fn select_port() -> Option<String> {
    let mut found_ports;
    let mut attempt: usize = 1;
    let waiting_period: usize = 1;

    let pb = spinner();

    // Avoid cursor flicker during the waiting
    let _ = Term::stdout().hide_cursor();
    // Enumerate connected USB serial devices until we have some.
    loop {
        found_ports = enumerate_serial_ports();
        let num_ports = found_ports.len();
        if num_ports > 0 {
            pb.finish_with_message("Select the board console:");
            break;
        } else {
            let waited = attempt * waiting_period;
            pb.set_message(format!(
                "[{:03}s {}] ⌛ Waiting for a USB serial controller to be connected...",
                style(waited).dim(),
                num_ports
            ));
            attempt += 1;
        }

        thread::sleep(Duration::from_secs(waiting_period as u64));
    }
    let _ = Term::stdout().show_cursor();

    let selection = select_port_interactive(&found_ports);
    match &selection {
        Some(path) => {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
        }
        None => {
            pb.finish_with_message("❌ Selection canceled -> refreshing...");
        }
    }
    selection
}

/// Check for a device with the given path in the system. If not immediately
/// found, enter into a waiting loop, checking every period of time whether the
/// device has been created or not. While waiting, the user can interactively
/// cancel waiting by pressing the `ESC` key.
pub fn wait_for_port(path: &str) -> PortWait {
    if port_present(path) {
        return PortWait::Ready;
    }

    let pb = spinner();
    let mut attempt: usize = 1;
    let waiting_period = 2;

    pb.set_message(format!(
        "[{:03}s] ⏳ Waiting for {} to be ready (ESC to cancel)...",
        style(0).dim(),
        style(path).cyan()
    ));

    // The main thread enumerates ports while a second one listens for keys.
    // `key_tx`/`key_rx` carry the key that ended the wait, `done_tx`/`done_rx`
    // tell the key thread that the port showed up.
    let (key_tx, key_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let key_thread = thread::spawn(move || loop {
        if done_rx.try_recv().is_ok() {
            break;
        }
        match poll_key(Duration::from_millis(500)) {
            Ok(Some(key @ KeyPress::Escape)) | Ok(Some(key @ KeyPress::Interrupt)) => {
                let _ = key_tx.send(key);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("key polling failed: {}", e);
                break;
            }
        }
    });

    let outcome = loop {
        if port_present(path) {
            let _ = done_tx.send(());
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
            break PortWait::Ready;
        }

        let waited = attempt * waiting_period;
        pb.set_message(format!(
            "[{:03}s] ⏳ Waiting for {} to be ready (ESC to cancel)...",
            style(waited).dim(),
            style(path).cyan()
        ));

        match key_rx.recv_timeout(Duration::from_secs(waiting_period as u64)) {
            Ok(KeyPress::Interrupt) => {
                pb.finish_with_message("🛑 Interrupted");
                break PortWait::Interrupted;
            }
            Ok(_) => {
                pb.finish_with_message(format!(
                    "❌ Waiting on port {} canceled after {} seconds",
                    style(path).cyan(),
                    style(waited).dim()
                ));
                break PortWait::Cancelled;
            }
            Err(RecvTimeoutError::Timeout) => {}
            // The key thread gave up on the terminal; keep waiting on the
            // port alone.
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(Duration::from_secs(waiting_period as u64));
            }
        }

        attempt += 1;
    };

    if key_thread.join().is_err() {
        debug!("key polling thread panicked");
    }

    outcome
}

/// Whether a serial port with the given path is currently present.
pub fn port_present(path: &str) -> bool {
    enumerate_serial_ports()
        .iter()
        .any(|detected| detected.starts_with(path))
}

/// Open the port described by `settings`, retrying a few times since freshly
/// plugged USB adapters take a moment to become usable.
pub(crate) fn open_and_setup_port(settings: &SerialSettings) -> Result<Box<dyn SerialPort>> {
    use retry::{delay, retry_with_index};

    let path = settings
        .path
        .clone()
        .ok_or_else(|| Error::Configuration("serial port has no path".into()))?;

    let result = retry_with_index(
        delay::Fixed::from_millis(1000).take(4),
        |index| -> std::result::Result<Box<dyn SerialPort>, serialport::Error> {
            debug!("Trying to connect {} ({})", path, index);
            serialport::new(&path, settings.baud_rate)
                .data_bits(settings.data_bits)
                .stop_bits(settings.stop_bits)
                .parity(settings.parity)
                .flow_control(settings.flow_control)
                .open()
        },
    );

    let mut port = match result {
        Ok(port) => port,
        Err(retry::Error::Operation {
            error,
            total_delay,
            tries,
        }) => {
            info!(
                "Failed to open {} after {:?} and {} tries: {}",
                path, total_delay, tries, error,
            );
            return Err(error.into());
        }
        Err(retry::Error::Internal(msg)) => {
            return Err(Error::Execution(format!(
                "internal error while retrying to open {}: {}",
                path, msg
            )));
        }
    };

    // Configure the port again, some drivers ignore the values given at
    // `open` time.
    port.set_baud_rate(settings.baud_rate)?;
    port.set_data_bits(settings.data_bits)?;
    port.set_stop_bits(settings.stop_bits)?;
    port.set_parity(settings.parity)?;
    port.set_flow_control(settings.flow_control)?;

    info!("Connected to {} at {} baud", path, port.baud_rate()?);
    debug!("data_bits    : {:#?}", port.data_bits()?);
    debug!("stop_bits    : {:#?}", port.stop_bits()?);
    debug!("parity       : {:#?}", port.parity()?);
    debug!("flow control : {:#?}", port.flow_control()?);

    if port.baud_rate()? != settings.baud_rate {
        return Err(Error::Configuration(format!(
            "{} refused baud rate {}, it is probably not a valid one",
            path, settings.baud_rate
        )));
    }

    Ok(port)
}

//==============================================================================
// Private stuff
//==============================================================================

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(120);
    pb.set_style(
        ProgressStyle::default_spinner()
            // For more spinners check out the cli-spinners project:
            // https://github.com/sindresorhus/cli-spinners/blob/master/spinners.json
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[HUT] {spinner:.blue} {msg}"),
    );
    pb
}

/// Enumerates serial devices on the system, decorating USB ones with their
/// manufacturer and product.
fn enumerate_serial_ports() -> Vec<String> {
    let mut ports = vec![];
    match available_ports() {
        Ok(found) => {
            for p in found {
                match p.port_type {
                    SerialPortType::UsbPort(info) => {
                        let extended_name = format!(
                            "{}: ({} / {})",
                            p.port_name,
                            info.manufacturer.as_ref().map_or("", String::as_str),
                            info.product.as_ref().map_or("", String::as_str)
                        );
                        ports.push(extended_name);
                    }
                    // Keep the other devices too, such as virtual ports for
                    // testing
                    _ => {
                        ports.push(p.port_name);
                    }
                }
            }
        }
        Err(ref e) => {
            info!("error: {}", e.to_string());
        }
    }
    ports
}

fn select_port_interactive(ports: &[String]) -> Option<String> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let term = Term::buffered_stderr();
    let theme = ColorfulTheme::default();

    let mut select = Select::with_theme(&theme);
    for item in ports {
        select.item(item);
    }

    match select.default(0).interact_on_opt(&term) {
        Ok(selection) => selection
            .and_then(|x| ports.get(x))
            .and_then(|name| name.split(':').next())
            .map(String::from),
        Err(ref e) => {
            info!("error: {}", e);
            None
        }
    }
}
