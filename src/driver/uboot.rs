use std::time::Duration;

use log::{debug, info};

use super::shell::run_framed;
use super::{bound, unknown_slot, Binding, Driver, DriverHandle, Requirement, Supplier};
use crate::console::Pattern;
use crate::error::Result;
use crate::protocol::{BootloaderProtocol, CommandOutput, CommandProtocol, Protocol};
use crate::settings::UBootConfig;

const BINDINGS: &[Binding] = &[Binding {
    slot: "console",
    accepts: &[Requirement::Protocol(Protocol::Console)],
}];

/// U-Boot on a console.
///
/// Activation waits for the board to reach the prompt, stopping the autoboot
/// countdown on the way, so it is meant to run right after a power cycle.
pub struct UBootDriver {
    config: UBootConfig,
    console: Option<DriverHandle>,
}
impl UBootDriver {
    pub fn new(config: UBootConfig) -> Self {
        UBootDriver {
            config,
            console: None,
        }
    }

    fn console(&self) -> Result<&DriverHandle> {
        bound(&self.console, "UBootDriver", "console")
    }

    fn await_prompt(&self) -> Result<()> {
        let prompt = Pattern::regex(&self.config.prompt)?;
        let autoboot = Pattern::regex(&self.config.autoboot)?;
        let interrupt = self.config.interrupt.as_str();
        let timeout = self.config.login_timeout;

        self.console()?.with_console(|c| {
            let found = c.expect(&[prompt.clone(), autoboot], timeout)?;
            if found.index == 1 {
                debug!("stopping autoboot");
                c.write(interrupt)?;
                c.expect(&[prompt], timeout)?;
            }
            Ok(())
        })?;
        info!("U-Boot prompt reached");
        Ok(())
    }
}
impl Driver for UBootDriver {
    fn kind(&self) -> &'static str {
        "UBootDriver"
    }

    fn protocols(&self) -> &'static [Protocol] {
        &[Protocol::Bootloader, Protocol::Command]
    }

    fn bindings(&self) -> &'static [Binding] {
        BINDINGS
    }

    fn bind(&mut self, slot: &str, supplier: Supplier) -> Result<()> {
        match slot {
            "console" => self.console = Some(supplier.into_driver(slot)?),
            _ => return Err(unknown_slot(self.kind(), slot)),
        }
        Ok(())
    }

    fn on_activate(&mut self) -> Result<()> {
        self.await_prompt()
    }

    fn on_adopt(&mut self) -> Result<()> {
        Ok(())
    }

    fn as_bootloader(&mut self) -> Option<&mut dyn BootloaderProtocol> {
        Some(self)
    }

    fn as_command(&mut self) -> Option<&mut dyn CommandProtocol> {
        Some(self)
    }
}
impl BootloaderProtocol for UBootDriver {
    fn boot(&mut self, name: &str) -> Result<()> {
        let command = if name.is_empty() {
            self.config.boot_command.clone()
        } else {
            format!("boot {}", name)
        };
        info!("booting with `{}`", command);
        self.console()?.with_console(|c| c.sendline(&command))
    }

    fn await_boot(&mut self) -> Result<()> {
        let expression = Pattern::regex(&self.config.boot_expression)?;
        let timeout = self.config.boot_timeout;
        self.console()?
            .with_console(|c| c.expect(&[expression], timeout).map(|_| ()))
    }
}
impl CommandProtocol for UBootDriver {
    fn run(&mut self, cmd: &str, timeout: Option<Duration>) -> Result<CommandOutput> {
        let timeout = timeout.unwrap_or(self.config.command_timeout);
        run_framed(self.console()?, cmd, &self.config.prompt, timeout)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::console::ScriptedTransport;
    use crate::driver::SerialDriver;
    use crate::resource::{Resource, ResourceKind};
    use crate::settings::SerialSettingsBuilder;
    use crate::Target;

    fn setup(script: &ScriptedTransport) -> (Target, DriverHandle) {
        let mut target = Target::new("board");
        target
            .add_resource(Resource::new(
                "tty",
                ResourceKind::SerialPort(SerialSettingsBuilder::new().finalize()),
            ))
            .unwrap();
        target
            .add_driver("serial", Box::new(SerialDriver::new(Rc::new(script.clone()))))
            .unwrap();
        let uboot = target
            .add_driver("uboot", Box::new(UBootDriver::new(UBootConfig::default())))
            .unwrap();
        (target, uboot)
    }

    #[test]
    fn activation_stops_autoboot() {
        let script = ScriptedTransport::new().on("", "<INTERRUPT>\r\n=> ");
        script.emit("U-Boot 2021.01\r\nHit any key to stop autoboot:  3 ");
        let (mut target, uboot) = setup(&script);
        target.activate(&uboot).unwrap();
        assert_eq!(script.writes(), vec![""]);
    }

    #[test]
    fn activation_without_countdown_times_out() {
        let script = ScriptedTransport::new();
        script.emit("U-Boot 2021.01\r\nDRAM:  2 GiB\r\n");
        let (mut target, uboot) = setup(&script);
        let err = target.activate(&uboot).unwrap_err();
        assert!(err.is_timeout(), "{}", err);
        assert!(!uboot.is_active());
    }

    #[test]
    fn boot_and_wait_for_the_kernel() {
        let script = ScriptedTransport::new()
            .on("run bootcmd", "Loading kernel\r\nStarting kernel ...\r\n")
            .on("boot mmc", "Starting kernel ...\r\n");
        script.emit("=> ");
        let (mut target, uboot) = setup(&script);
        target.activate(&uboot).unwrap();

        uboot
            .with_bootloader(|b| {
                b.boot("")?;
                b.await_boot()
            })
            .unwrap();
        uboot
            .with_bootloader(|b| {
                b.boot("mmc")?;
                b.await_boot()
            })
            .unwrap();
        assert_eq!(script.writes(), vec!["run bootcmd", "boot mmc"]);
    }

    #[test]
    fn runs_commands_at_the_prompt() {
        let script = ScriptedTransport::new().on_command("printenv serverip", &["serverip=10.0.0.1"], 0, "=> ");
        script.emit("=> ");
        let (mut target, uboot) = setup(&script);
        target.activate(&uboot).unwrap();
        let out = uboot
            .with_command(|c| c.run_check("printenv serverip", None))
            .unwrap();
        assert_eq!(out, vec!["serverip=10.0.0.1"]);
    }
}
