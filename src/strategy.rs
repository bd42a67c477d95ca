//! Strategies: state machines driving a board through named operational
//! states on top of a target's drivers.

mod recipe;
mod status;
mod uboot;

use log::info;

use crate::error::Result;

pub use recipe::{recipe, Action, Recipe, Role, Step};
pub use status::Status;
pub use uboot::UBootStrategy;

/// A state machine over the drivers of one target.
pub trait Strategy {
    /// Last state reached by a successful `transition` or `force`.
    fn status(&self) -> Status;

    /// Drive the board to `status`, walking the prerequisite states first.
    /// On failure the status stays at the last state fully reached.
    fn transition(&mut self, status: Status) -> Result<()>;

    /// Declare the board to be in `status` without touching the hardware,
    /// bringing up only the drivers that state needs.
    fn force(&mut self, status: Status) -> Result<()>;
}

/// Handle a request for the state named `state`, forced or not, and return
/// the resulting status.
pub fn request(strategy: &mut dyn Strategy, state: &str, force: bool) -> Result<Status> {
    let status: Status = state.parse()?;
    if force {
        info!("forcing state {}", status);
        strategy.force(status)?;
    } else {
        info!("transition {} -> {}", strategy.status(), status);
        strategy.transition(status)?;
    }
    Ok(strategy.status())
}
