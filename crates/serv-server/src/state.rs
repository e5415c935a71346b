//! Server lifecycle states.

use std::fmt;

use thiserror::Error;

/// The lifecycle state of a [`Server`](crate::Server).
///
/// ```text
/// Unstarted ──start──▶ Started ──shutdown/close──▶ Closing ──▶ Closed
///                         │                                      │
///                         └──accept error──▶ Errored     start ◀─┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum State {
    /// Initial state; all configuration may still be changed.
    #[default]
    Unstarted,
    /// Accepting and serving connections.
    Started,
    /// The accept loop exited with an error.
    Errored,
    /// A shutdown or close is in progress.
    Closing,
    /// Fully stopped; the server may be started again.
    Closed,
}

impl State {
    /// Returns the lowercase name of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Started => "started",
            Self::Errored => "errored",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation that was attempted from an invalid state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateReason {
    /// Options were applied to a running server.
    #[error("server has already started")]
    AlreadyStarted,
    /// A start was attempted while started or closing.
    #[error("unable to start server")]
    UnableToStart,
    /// A shutdown was attempted while not started.
    #[error("unable to shutdown server")]
    UnableToShutdown,
    /// A close was attempted while not started.
    #[error("unable to close server")]
    UnableToClose,
}

/// An operation was attempted from a state that forbids it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{reason}: unexpected state {state}")]
pub struct InvalidStateError {
    /// What was attempted.
    pub reason: StateReason,
    /// The state the server was in.
    pub state: State,
}

impl InvalidStateError {
    pub(crate) const fn new(reason: StateReason, state: State) -> Self {
        Self { reason, state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(State::default(), State::Unstarted);
        assert_eq!(State::Unstarted.to_string(), "unstarted");
        assert_eq!(State::Started.to_string(), "started");
        assert_eq!(State::Errored.to_string(), "errored");
        assert_eq!(State::Closing.to_string(), "closing");
        assert_eq!(State::Closed.to_string(), "closed");
    }

    #[test]
    fn test_invalid_state_error_display() {
        let err = InvalidStateError::new(StateReason::UnableToShutdown, State::Closed);
        assert_eq!(
            err.to_string(),
            "unable to shutdown server: unexpected state closed"
        );
    }
}
