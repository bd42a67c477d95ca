use log::{debug, info};

use super::recipe::{recipe, Role, Step};
use super::{Status, Strategy};
use crate::console::Pattern;
use crate::driver::DriverHandle;
use crate::error::{Error, Result};
use crate::protocol::Protocol;
use crate::settings::StrategyConfig;
use crate::target::Target;

const SYSTEM_RUNNING: &str = "systemctl is-system-running --wait";

/// Boots a board through U-Boot into a Linux shell.
///
/// The strategy owns its target and picks its four drivers by protocol when
/// created: the power driver, the console driver, the bootloader driver and
/// the shell driver. See [`recipe`](super::recipe()) for the steps of each
/// state.
pub struct UBootStrategy {
    target: Target,
    power: DriverHandle,
    console: DriverHandle,
    bootloader: DriverHandle,
    shell: DriverHandle,
    status: Status,
    config: StrategyConfig,
}
impl UBootStrategy {
    pub fn new(target: Target, config: StrategyConfig) -> Result<Self> {
        let power = target.resolve_driver(Protocol::Power)?;
        let console = target.resolve_driver(Protocol::Console)?;
        let bootloader = target.resolve_driver(Protocol::Bootloader)?;
        let shell = target.resolve_driver(Protocol::Shell)?;
        info!(
            "{}: strategy uses {}, {}, {} and {}",
            target.name(),
            power,
            console,
            bootloader,
            shell
        );
        Ok(UBootStrategy {
            target,
            power,
            console,
            bootloader,
            shell,
            status: Status::Unknown,
            config,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut Target {
        &mut self.target
    }

    /// Give the target back, e.g. to deactivate everything on exit.
    pub fn into_target(self) -> Target {
        self.target
    }

    fn driver(&self, role: Role) -> &DriverHandle {
        match role {
            Role::Power => &self.power,
            Role::Console => &self.console,
            Role::Bootloader => &self.bootloader,
            Role::Shell => &self.shell,
        }
    }

    fn run(&mut self, step: Step) -> Result<()> {
        debug!("{}: {}", self.target.name(), step);
        match step {
            Step::Activate(role) => {
                let driver = self.driver(role).clone();
                self.target.activate(&driver)
            }
            Step::Deactivate(role) => {
                let driver = self.driver(role).clone();
                self.target.deactivate(&driver)
            }
            Step::PowerOff => self.power.with_power(|p| p.off()),
            Step::PowerCycle => self.power.with_power(|p| p.cycle()),
            Step::Boot => self.bootloader.with_bootloader(|b| b.boot("")),
            Step::AwaitBoot => self.bootloader.with_bootloader(|b| b.await_boot()),
            Step::AwaitSystem => {
                let timeout = self.config.systemd_timeout;
                let output = self
                    .shell
                    .with_command(|c| c.run(SYSTEM_RUNNING, Some(timeout)))?;
                info!(
                    "system state: {} ({})",
                    output.stdout.join(" "),
                    output.exit_code
                );
                Ok(())
            }
            Step::Sendline(line) => self.console.with_console(|c| c.sendline(line)),
            Step::AwaitShutdown(marker) => {
                let timeout = self.config.shutdown_timeout;
                let found = self
                    .console
                    .with_console(|c| c.expect(&[Pattern::from(marker), Pattern::Eof], timeout))?;
                if found.index == 1 {
                    // The port is gone with the board; bring it up again on
                    // the next activation.
                    info!("{}: console closed during shutdown", self.target.name());
                    let console = self.console.clone();
                    self.target.deactivate(&console)?;
                }
                Ok(())
            }
        }
    }
}
impl Strategy for UBootStrategy {
    fn status(&self) -> Status {
        self.status
    }

    fn transition(&mut self, status: Status) -> Result<()> {
        let recipe = recipe(status).ok_or_else(|| {
            Error::Strategy(format!("can not transition to `{}`", status))
        })?;
        if status == self.status {
            debug!("{}: already in state {}", self.target.name(), status);
            return Ok(());
        }

        let from = self.status;
        if let Some(required) = recipe.requires {
            if recipe.bypass_from == Some(from) {
                debug!("{}: coming from {}, not ensuring {}", self.target.name(), from, required);
            } else {
                self.transition(required)?;
            }
        }

        for action in recipe.actions {
            if action.skip_from == Some(from) {
                debug!("{}: coming from {}, skipping {}", self.target.name(), from, action.step);
                continue;
            }
            self.run(action.step).map_err(|e| Error::Transition {
                state: status,
                step: action.step.to_string(),
                source: Box::new(e),
            })?;
        }

        info!("{}: {} -> {}", self.target.name(), self.status, status);
        self.status = status;
        Ok(())
    }

    fn force(&mut self, status: Status) -> Result<()> {
        let driver = match status {
            Status::Off => self.power.clone(),
            Status::Bootloader => self.bootloader.clone(),
            Status::Shell => self.shell.clone(),
            other => {
                return Err(Error::Strategy(format!("can not force state `{}`", other)));
            }
        };
        self.target.adopt(&driver)?;
        info!("{}: forced {} -> {}", self.target.name(), self.status, status);
        self.status = status;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
