//! The fixed recipes of the U-Boot strategy.
//!
//! Every state is reached by first ensuring its prerequisite state, then
//! running its actions in order. Two shortcuts exist for boards coming out
//! of a reboot, where the power state is already known:
//!
//! ```text
//!                     ┌──────────── (skipped from reboot) ────────────┐
//!  unknown ──▶ off ──▶ bootloader ──▶ shell ──┬──▶ reboot ─────────────┘
//!                                             └──▶ poweroff
//! ```

use std::fmt;

use super::Status;

/// A driver the strategy switches between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Power,
    Console,
    Bootloader,
    Shell,
}
impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Power => "power",
            Role::Console => "console",
            Role::Bootloader => "bootloader",
            Role::Shell => "shell",
        };
        f.write_str(name)
    }
}

/// One concrete action of a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Activate(Role),
    Deactivate(Role),
    PowerOff,
    PowerCycle,
    /// Let the bootloader continue with its default boot command.
    Boot,
    /// Wait for the bootloader to hand over to the kernel.
    AwaitBoot,
    /// Wait for the init system to finish starting units, whatever their
    /// outcome.
    AwaitSystem,
    Sendline(&'static str),
    /// Wait for the marker or for the console to close.
    AwaitShutdown(&'static str),
}
impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Activate(role) => write!(f, "activate {} driver", role),
            Step::Deactivate(role) => write!(f, "deactivate {} driver", role),
            Step::PowerOff => f.write_str("power off"),
            Step::PowerCycle => f.write_str("power cycle"),
            Step::Boot => f.write_str("boot"),
            Step::AwaitBoot => f.write_str("wait for boot"),
            Step::AwaitSystem => f.write_str("wait for system startup"),
            Step::Sendline(line) => write!(f, "send `{}`", line),
            Step::AwaitShutdown(marker) => write!(f, "wait for `{}`", marker),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub step: Step,
    /// The step is skipped when the transition starts from this state.
    pub skip_from: Option<Status>,
}

const fn always(step: Step) -> Action {
    Action {
        step,
        skip_from: None,
    }
}

/// How to reach `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recipe {
    pub target: Status,
    /// State to be in before the actions run.
    pub requires: Option<Status>,
    /// The prerequisite is not ensured when starting from this state.
    pub bypass_from: Option<Status>,
    pub actions: &'static [Action],
}

static RECIPES: [Recipe; 5] = [
    Recipe {
        target: Status::Off,
        requires: None,
        bypass_from: None,
        actions: &[
            always(Step::Deactivate(Role::Console)),
            always(Step::Activate(Role::Power)),
            always(Step::PowerOff),
        ],
    },
    Recipe {
        target: Status::Bootloader,
        requires: Some(Status::Off),
        bypass_from: Some(Status::Reboot),
        actions: &[
            always(Step::Activate(Role::Console)),
            Action {
                step: Step::PowerCycle,
                skip_from: Some(Status::Reboot),
            },
            always(Step::Activate(Role::Bootloader)),
        ],
    },
    Recipe {
        target: Status::Shell,
        requires: Some(Status::Bootloader),
        bypass_from: None,
        actions: &[
            always(Step::Boot),
            always(Step::AwaitBoot),
            always(Step::Activate(Role::Shell)),
            always(Step::AwaitSystem),
        ],
    },
    Recipe {
        target: Status::Reboot,
        requires: Some(Status::Shell),
        bypass_from: None,
        actions: &[
            always(Step::Activate(Role::Console)),
            always(Step::Sendline("reboot")),
            always(Step::AwaitShutdown("reboot: Restarting system")),
        ],
    },
    Recipe {
        target: Status::Poweroff,
        requires: Some(Status::Shell),
        bypass_from: None,
        actions: &[
            always(Step::Activate(Role::Console)),
            always(Step::Sendline("poweroff")),
            always(Step::AwaitShutdown("reboot: Power down")),
        ],
    },
];

/// The recipe reaching `status`; `unknown` has none.
pub fn recipe(status: Status) -> Option<&'static Recipe> {
    RECIPES.iter().find(|recipe| recipe.target == status)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Follow prerequisites from `status` down to a recipe without one.
    fn chain(status: Status) -> Vec<Status> {
        let mut chain = vec![status];
        let mut current = status;
        while let Some(required) = recipe(current).and_then(|r| r.requires) {
            chain.push(required);
            current = required;
        }
        chain.reverse();
        chain
    }

    #[test]
    fn every_destination_has_a_recipe() {
        assert!(recipe(Status::Unknown).is_none());
        for status in Status::ALL.iter().skip(1) {
            assert_eq!(recipe(*status).unwrap().target, *status);
        }
    }

    #[test]
    fn prerequisites_form_a_chain_rooted_at_off() {
        assert_eq!(
            chain(Status::Reboot),
            vec![Status::Off, Status::Bootloader, Status::Shell, Status::Reboot]
        );
        assert_eq!(chain(Status::Off), vec![Status::Off]);
    }

    #[test]
    fn reboot_path_skips_the_power_cycle() {
        let bootloader = recipe(Status::Bootloader).unwrap();
        assert_eq!(bootloader.bypass_from, Some(Status::Reboot));
        let skipped: Vec<Step> = bootloader
            .actions
            .iter()
            .filter(|a| a.skip_from == Some(Status::Reboot))
            .map(|a| a.step)
            .collect();
        assert_eq!(skipped, vec![Step::PowerCycle]);
        assert_eq!(Step::AwaitSystem.to_string(), "wait for system startup");
    }
}
