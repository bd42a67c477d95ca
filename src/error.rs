//! Error taxonomy shared by targets, drivers, backends and strategies.
//!
//! Errors are never retried inside the crate. Backend and binding failures
//! travel unchanged from the driver, through the [`Target`](crate::Target), up
//! to the [`Strategy`](crate::Strategy), which only decorates them with the
//! state and step that failed (see [`Error::Transition`]).

use std::time::Duration;

use thiserror::Error;

use crate::strategy::Status;

/// Errors raised while binding, activating or driving a board.
#[derive(Debug, Error)]
pub enum Error {
    /// The target description cannot be resolved unambiguously. Not
    /// retryable: the setup has to change.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No resource or driver satisfies a required binding slot.
    #[error("binding error: {0}")]
    Binding(String),

    /// An external backend call failed (process exit status, SNMP reply,
    /// non-zero command status on the board...).
    #[error("execution error: {0}")]
    Execution(String),

    /// An expected console pattern or device condition did not show up in
    /// time.
    #[error("timeout after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    /// The requested state is not valid or cannot be reached.
    #[error("strategy error: {0}")]
    Strategy(String),

    /// A step of a state transition failed.
    #[error("transition to `{state}` failed at step `{step}`: {source}")]
    Transition {
        state: Status,
        step: String,
        #[source]
        source: Box<Error>,
    },

    /// A capability was used on a driver that is not active on its target.
    #[error("driver `{0}` is not active")]
    NotActive(String),

    /// A backend precondition on an outlet index failed before any I/O.
    #[error("index {index} out of range 1..={max}")]
    OutOfRange { index: u32, max: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serial(#[from] serialport::Error),
}

impl Error {
    /// Whether this error, or the cause wrapped by a failed transition step,
    /// is a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Transition { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// The innermost error, looking through transition step wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Transition { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_seen_through_transition() {
        let err = Error::Transition {
            state: Status::Shell,
            step: "wait for system startup".into(),
            source: Box::new(Error::Timeout {
                what: "prompt".into(),
                timeout: Duration::from_secs(30),
            }),
        };
        assert!(err.is_timeout());
        assert!(matches!(err.root_cause(), Error::Timeout { .. }));
        assert_eq!(
            err.to_string(),
            "transition to `shell` failed at step `wait for system startup`: \
             timeout after 30s waiting for prompt"
        );
    }

    #[test]
    fn display() {
        let err = Error::OutOfRange { index: 25, max: 24 };
        assert_eq!(err.to_string(), "index 25 out of range 1..=24");
        assert!(!err.is_timeout());
    }
}
