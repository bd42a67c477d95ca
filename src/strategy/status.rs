use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Operational states of a board, as tracked by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Nothing is known; the starting point, never a destination.
    Unknown,
    Off,
    /// Sitting at the bootloader prompt.
    Bootloader,
    /// Logged into the booted system.
    Shell,
    /// A reboot was issued from the shell.
    Reboot,
    /// A power down was issued from the shell.
    Poweroff,
}
impl Status {
    pub const ALL: [Status; 6] = [
        Status::Unknown,
        Status::Off,
        Status::Bootloader,
        Status::Shell,
        Status::Reboot,
        Status::Poweroff,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Off => "off",
            Status::Bootloader => "bootloader",
            Status::Shell => "shell",
            Status::Reboot => "reboot",
            Status::Poweroff => "poweroff",
        }
    }
}
impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if name == "uboot" {
            return Ok(Status::Bootloader);
        }
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.name() == name)
            .ok_or_else(|| {
                Error::Strategy(format!(
                    "unknown state `{}`, expected one of: {}",
                    s,
                    Status::ALL
                        .iter()
                        .map(|status| status.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}
