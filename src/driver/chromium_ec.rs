use std::thread;

use log::{debug, info};

use super::{bound, unknown_slot, Binding, Driver, DriverHandle, Requirement, Supplier};
use crate::console::Pattern;
use crate::error::{Error, Result};
use crate::protocol::{PowerProtocol, Protocol};
use crate::settings::ChromiumEcConfig;

const BINDINGS: &[Binding] = &[Binding {
    slot: "console",
    accepts: &[Requirement::Protocol(Protocol::Console)],
}];

/// Power management through the console of a Chromium OS embedded
/// controller.
///
/// The EC reports its power state machine on `powerinfo`:
///
/// ```text
///  apshutdown ──▶ power state 0 = G3
///  powerbtn   ──▶ power state 3 = S0
///  reboot     ──▶ UART initialized after reboot
///                 Reset cause: reset-pin soft
///                 power state 4 = G3->S5
///                 power state 3 = S0
/// ```
pub struct ChromiumEcPowerDriver {
    config: ChromiumEcConfig,
    console: Option<DriverHandle>,
}
impl ChromiumEcPowerDriver {
    pub fn new(config: ChromiumEcConfig) -> Self {
        ChromiumEcPowerDriver {
            config,
            console: None,
        }
    }

    fn console(&self) -> Result<&DriverHandle> {
        bound(&self.console, "ChromiumEcPowerDriver", "console")
    }

    /// Send `command` then ask for the power state and wait for `state`.
    fn command_then_state(&self, command: &str, state: &str) -> Result<()> {
        let delay = self.config.command_delay;
        let timeout = self.config.command_timeout;
        self.console()?.with_console(|console| {
            console.sendline(command)?;
            thread::sleep(delay);
            console.sendline("powerinfo")?;
            console.expect(&[Pattern::from(state)], timeout)?;
            Ok(())
        })
    }
}
impl Driver for ChromiumEcPowerDriver {
    fn kind(&self) -> &'static str {
        "ChromiumEcPowerDriver"
    }

    fn protocols(&self) -> &'static [Protocol] {
        &[Protocol::Power]
    }

    fn bindings(&self) -> &'static [Binding] {
        BINDINGS
    }

    /// A dedicated power switch is preferred when the target has one.
    fn priority(&self, _protocol: Protocol) -> i32 {
        -10
    }

    fn bind(&mut self, slot: &str, supplier: Supplier) -> Result<()> {
        match slot {
            "console" => self.console = Some(supplier.into_driver(slot)?),
            _ => return Err(unknown_slot(self.kind(), slot)),
        }
        Ok(())
    }

    fn as_power(&mut self) -> Option<&mut dyn PowerProtocol> {
        Some(self)
    }
}
impl PowerProtocol for ChromiumEcPowerDriver {
    fn on(&mut self) -> Result<()> {
        info!("EC: power on");
        self.command_then_state("powerbtn", "power state 3 = S0")
    }

    fn off(&mut self) -> Result<()> {
        info!("EC: power off");
        self.command_then_state("apshutdown", "power state 0 = G3")?;

        // The EC briefly reports G3 before the AP rail really drops.
        debug!("EC: letting the power state settle");
        thread::sleep(self.config.off_settle_delay);
        let timeout = self.config.command_timeout;
        self.console()?.with_console(|console| {
            console.sendline("powerinfo")?;
            console.expect(&[Pattern::from("power state 0 = G3")], timeout)?;
            Ok(())
        })
    }

    fn cycle(&mut self) -> Result<()> {
        info!("EC: power cycle");
        let timeout = self.config.command_timeout;
        self.console()?.with_console(|console| {
            console.sendline("reboot")?;
            console.expect(&[Pattern::from("UART initialized after reboot")], timeout)?;
            console.expect(&[Pattern::from("Reset cause: reset-pin soft")], timeout)?;
            console.expect(&[Pattern::from("power state 4 = G3->S5")], timeout)?;
            console.expect(&[Pattern::from("power state 3 = S0")], timeout)?;
            Ok(())
        })
    }

    fn get(&mut self) -> Result<bool> {
        let timeout = self.config.command_timeout;
        let found = self.console()?.with_console(|console| {
            console.sendline("powerinfo")?;
            console.expect(&[Pattern::regex(r"power state (\d+) = (\S+)")?], timeout)
        })?;
        match found.groups.get(1).and_then(|g| g.as_deref()) {
            Some("S0") => Ok(true),
            Some(state) => {
                debug!("EC: AP in power state {}", state);
                Ok(false)
            }
            None => Err(Error::Execution("EC reported no power state".into())),
        }
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
    use crate::settings::{SerialSettingsBuilder, SettingsBuilder};
    use crate::Target;

    fn setup(script: &ScriptedTransport) -> (Target, DriverHandle) {
        let settings = SettingsBuilder::new().without_delays().finalize();
        let mut target = Target::new("board");
        target
            .add_resource(Resource::new(
                "ec-uart",
                ResourceKind::SerialPort(SerialSettingsBuilder::new().finalize()),
            ))
            .unwrap();
        target
            .add_driver("serial", Box::new(SerialDriver::new(Rc::new(script.clone()))))
            .unwrap();
        let ec = target
            .add_driver("ec", Box::new(ChromiumEcPowerDriver::new(settings.chromium_ec)))
            .unwrap();
        target.activate(&ec).unwrap();
        (target, ec)
    }

    #[test]
    fn off_checks_the_state_twice() {
        let script = ScriptedTransport::new().on("powerinfo", "power state 0 = G3\n> ");
        let (_target, ec) = setup(&script);
        ec.with_power(|p| p.off()).unwrap();
        assert_eq!(script.writes(), vec!["apshutdown", "powerinfo", "powerinfo"]);
    }

    #[test]
    fn on_times_out_when_the_ap_stays_down() {
        let script = ScriptedTransport::new().on("powerinfo", "power state 0 = G3\n> ");
        let (_target, ec) = setup(&script);
        let err = ec.with_power(|p| p.on()).unwrap_err();
        assert!(err.is_timeout(), "{}", err);
    }

    #[test]
    fn cycle_follows_the_reboot_log() {
        let script = ScriptedTransport::new().on(
            "reboot",
            "Rebooting!\nUART initialized after reboot\nReset cause: reset-pin soft\n\
             power state 4 = G3->S5\npower state 3 = S0\n",
        );
        let (_target, ec) = setup(&script);
        ec.with_power(|p| p.cycle()).unwrap();
        assert_eq!(script.writes(), vec!["reboot"]);
    }

    #[test]
    fn get_reads_powerinfo() {
        let script = ScriptedTransport::new()
            .once("powerinfo", "power state 3 = S0\n")
            .on("powerinfo", "power state 0 = G3\n");
        let (_target, ec) = setup(&script);
        assert!(ec.with_power(|p| p.get()).unwrap());
        assert!(!ec.with_power(|p| p.get()).unwrap());
    }
}
