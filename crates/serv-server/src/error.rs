//! Server error type.

use std::io;

use thiserror::Error;

use crate::port::PortParseError;
use crate::router::RouteError;
use crate::state::InvalidStateError;
use crate::tls::TlsError;

/// Errors returned by [`Server`](crate::Server) operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The operation is not allowed in the server's current state.
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    /// More than one option failed to apply.
    #[error("{}", join(.0))]
    Options(Vec<ServerError>),

    /// The listen address could not be bound.
    #[error("unable to listen on `{addr}`: {source}")]
    Bind {
        /// The address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The listener failed to accept a connection.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// A TLS setting or certificate is invalid.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// A port or address is malformed.
    #[error(transparent)]
    Port(#[from] PortParseError),

    /// A route could not be registered.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// The server was shut down or closed; not a failure.
    #[error("server closed")]
    Closed,

    /// A graceful shutdown did not complete within its deadline.
    #[error("shutdown deadline exceeded")]
    DeadlineExceeded,
}

impl ServerError {
    /// Reports whether this is the normal result of stopping a server.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Reports whether a graceful shutdown ran out of time.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }

    /// Collapses option failures into a single error.
    pub(crate) fn from_options(mut errors: Vec<ServerError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Options(errors)),
        }
    }
}

fn join(errors: &[ServerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{State, StateReason};

    #[test]
    fn test_from_options() {
        assert!(ServerError::from_options(Vec::new()).is_none());

        let single = ServerError::from_options(vec![ServerError::Closed]).unwrap();
        assert!(single.is_closed());

        let many = ServerError::from_options(vec![
            ServerError::Closed,
            ServerError::DeadlineExceeded,
        ])
        .unwrap();
        assert_eq!(many.to_string(), "server closed; shutdown deadline exceeded");
    }

    #[test]
    fn test_invalid_state_is_transparent() {
        let err: ServerError =
            InvalidStateError::new(StateReason::AlreadyStarted, State::Started).into();
        assert_eq!(
            err.to_string(),
            "server has already started: unexpected state started"
        );
    }
}
