//! Settings for the serial console line and for the drivers and strategy
//! operating a board.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values. Driver sections are plain structs
//! with defaults and can be replaced as a whole with struct update syntax:
//!
//! ```
//! use std::time::Duration;
//! use hutctl::{ShellConfig, SettingsBuilder};
//!
//! let settings = SettingsBuilder::new()
//!     .systemd_timeout(Duration::from_secs(90))
//!     .shell(ShellConfig {
//!         username: "admin".into(),
//!         ..ShellConfig::default()
//!     })
//!     .finalize();
//! assert_eq!(settings.shell.username, "admin");
//! ```

use std::time::Duration;

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

// =============================================================================
// Serial Line
// =============================================================================

/// Groups all settings related to a serial console line and acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SerialSettings {
    /// The port name, usually the device path.
    pub path: Option<String>,
    /// The baud rate in symbols-per-second.
    pub baud_rate: u32,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,

    /// Restrict creation of `SerialSettings` instances unless through the
    /// `SerialSettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

/// The builder for the `SerialSettings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// ```
/// let settings = hutctl::SerialSettingsBuilder::new().path("/dev/ttyUSB0").finalize();
/// assert_eq!(settings.baud_rate, 115_200);
/// ```
pub struct SerialSettingsBuilder {
    settings: SerialSettings,
}
impl SerialSettingsBuilder {
    /// Start building the settings using default values and no path for the
    /// port.
    pub fn new() -> Self {
        SerialSettingsBuilder {
            settings: SerialSettings {
                path: None,
                baud_rate: 115_200,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                _private_use_builder: (),
            },
        }
    }

    /// Set the path to the serial port
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().as_ref().to_owned());
        self
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the number of bits used to represent a character sent on the line
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Set the type of signalling to use for controlling data transfer
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Set the type of parity to use for error checking
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Set the number of bits to use to signal the end of a character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    pub fn finalize(self) -> SerialSettings {
        self.settings
    }
}
impl Default for SerialSettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Driver and Strategy Sections
// =============================================================================

/// Timeouts used by the [`UBootStrategy`](crate::UBootStrategy) itself.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    /// How long to wait for the init system to settle once a shell is up.
    pub systemd_timeout: Duration,
    /// How long to wait for the kernel to report a restart or power down.
    pub shutdown_timeout: Duration,
}
impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            systemd_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(300),
        }
    }
}

/// Console dialogue with a U-Boot bootloader. Patterns are regular
/// expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct UBootConfig {
    pub prompt: String,
    /// Printed while U-Boot counts down before booting on its own.
    pub autoboot: String,
    /// Sent to stop the countdown.
    pub interrupt: String,
    pub boot_command: String,
    /// Printed once the bootloader has handed over to the kernel.
    pub boot_expression: String,
    pub login_timeout: Duration,
    pub boot_timeout: Duration,
    /// Default timeout of commands run at the prompt.
    pub command_timeout: Duration,
}
impl Default for UBootConfig {
    fn default() -> Self {
        UBootConfig {
            prompt: r"=> ".into(),
            autoboot: r"stop autoboot".into(),
            interrupt: "\n".into(),
            boot_command: "run bootcmd".into(),
            boot_expression: r"Starting kernel".into(),
            login_timeout: Duration::from_secs(30),
            boot_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Login and prompt handling of a Linux shell on the board console. Patterns
/// are regular expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellConfig {
    pub prompt: String,
    pub login_prompt: String,
    pub username: String,
    pub password: Option<String>,
    pub password_prompt: String,
    pub login_timeout: Duration,
    /// Default timeout for commands run without an explicit one.
    pub command_timeout: Duration,
}
impl Default for ShellConfig {
    fn default() -> Self {
        ShellConfig {
            prompt: r"root@[\w.-]+:[^ ]+ ".into(),
            login_prompt: r" login: ".into(),
            username: "root".into(),
            password: None,
            password_prompt: r"Password: ".into(),
            login_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Power sequencing through a ChromiumOS embedded controller console.
#[derive(Debug, Clone, PartialEq)]
pub struct ChromiumEcConfig {
    /// Timeout for each `powerinfo` answer.
    pub command_timeout: Duration,
    /// Pause between a power command and the following `powerinfo`.
    pub command_delay: Duration,
    /// Pause after reaching G3 so the rails are fully discharged.
    pub off_settle_delay: Duration,
}
impl Default for ChromiumEcConfig {
    fn default() -> Self {
        ChromiumEcConfig {
            command_timeout: Duration::from_secs(1),
            command_delay: Duration::from_secs(1),
            off_settle_delay: Duration::from_secs(11),
        }
    }
}

/// Outlet switching through a network power backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkPowerConfig {
    /// Off time during a power cycle.
    pub cycle_delay: Duration,
}
impl Default for NetworkPowerConfig {
    fn default() -> Self {
        NetworkPowerConfig {
            cycle_delay: Duration::from_secs(2),
        }
    }
}

/// Image writing through a shell on the board.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Timeout of the copy command itself.
    pub timeout: Duration,
    /// How long the block device gets to report a non-zero size.
    pub medium_timeout: Duration,
    pub medium_poll_interval: Duration,
}
impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            timeout: Duration::from_secs(30),
            medium_timeout: Duration::from_secs(10),
            medium_poll_interval: Duration::from_millis(500),
        }
    }
}

// =============================================================================
// Aggregate Settings
// =============================================================================

/// All the knobs of the builtin drivers and of the strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub strategy: StrategyConfig,
    pub uboot: UBootConfig,
    pub shell: ShellConfig,
    pub chromium_ec: ChromiumEcConfig,
    pub network_power: NetworkPowerConfig,
    pub storage: StorageConfig,

    #[doc(hidden)]
    _private_use_builder: (),
}

/// The builder for [`Settings`]; every section starts from its defaults.
pub struct SettingsBuilder {
    settings: Settings,
}
impl SettingsBuilder {
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                strategy: StrategyConfig::default(),
                uboot: UBootConfig::default(),
                shell: ShellConfig::default(),
                chromium_ec: ChromiumEcConfig::default(),
                network_power: NetworkPowerConfig::default(),
                storage: StorageConfig::default(),
                _private_use_builder: (),
            },
        }
    }

    /// Set how long to wait for all startup units to finish
    pub fn systemd_timeout(mut self, timeout: Duration) -> Self {
        self.settings.strategy.systemd_timeout = timeout;
        self
    }

    /// Set how long to wait for the reboot or power down message
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.settings.strategy.shutdown_timeout = timeout;
        self
    }

    pub fn uboot(mut self, uboot: UBootConfig) -> Self {
        self.settings.uboot = uboot;
        self
    }

    pub fn shell(mut self, shell: ShellConfig) -> Self {
        self.settings.shell = shell;
        self
    }

    pub fn chromium_ec(mut self, chromium_ec: ChromiumEcConfig) -> Self {
        self.settings.chromium_ec = chromium_ec;
        self
    }

    pub fn network_power(mut self, network_power: NetworkPowerConfig) -> Self {
        self.settings.network_power = network_power;
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.settings.storage = storage;
        self
    }

    /// Zero every fixed settle delay. Meant for simulated consoles where
    /// waiting on real hardware makes no sense.
    pub fn without_delays(mut self) -> Self {
        self.settings.chromium_ec.command_delay = Duration::from_secs(0);
        self.settings.chromium_ec.off_settle_delay = Duration::from_secs(0);
        self.settings.network_power.cycle_delay = Duration::from_secs(0);
        self.settings.storage.medium_poll_interval = Duration::from_millis(0);
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}
impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_default() {
        let settings = SerialSettingsBuilder::new().finalize();
        assert_eq!(
            settings,
            SerialSettings {
                path: None,
                baud_rate: 115_200,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                _private_use_builder: (),
            }
        )
    }

    #[test]
    fn path() {
        let settings = SerialSettingsBuilder::new().path("/dev/ttyUSB0").finalize();
        assert_eq!(settings.path.unwrap(), "/dev/ttyUSB0");
    }

    #[test]
    fn line_parameters() {
        let settings = SerialSettingsBuilder::new()
            .baud_rate(9_600)
            .data_bits(DataBits::Seven)
            .flow_control(FlowControl::Hardware)
            .parity(Parity::Even)
            .stop_bits(StopBits::Two)
            .finalize();
        assert_eq!(settings.baud_rate, 9_600);
        assert_eq!(settings.data_bits, DataBits::Seven);
        assert_eq!(settings.flow_control, FlowControl::Hardware);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.stop_bits, StopBits::Two);
    }

    #[test]
    fn strategy_timeouts() {
        let settings = SettingsBuilder::new().finalize();
        assert_eq!(settings.strategy.systemd_timeout, Duration::from_secs(30));
        assert_eq!(settings.strategy.shutdown_timeout, Duration::from_secs(300));

        let settings = SettingsBuilder::new()
            .systemd_timeout(Duration::from_secs(5))
            .shutdown_timeout(Duration::from_secs(7))
            .finalize();
        assert_eq!(settings.strategy.systemd_timeout, Duration::from_secs(5));
        assert_eq!(settings.strategy.shutdown_timeout, Duration::from_secs(7));
    }

    #[test]
    fn without_delays() {
        let settings = SettingsBuilder::new().without_delays().finalize();
        assert_eq!(settings.chromium_ec.off_settle_delay, Duration::from_secs(0));
        assert_eq!(settings.network_power.cycle_delay, Duration::from_secs(0));
        // timeouts are left alone
        assert_eq!(settings.chromium_ec.command_timeout, Duration::from_secs(1));
    }
}
