//! Error types for the `presence` crate.
//!
//! Follows the same pattern as domain::error with a root Error struct and error kind enums.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the presence crate.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in presence.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Transport(TransportErrorKind),
    /// The presence actor is no longer running (shutdown or crashed).
    ServiceStopped,
}

/// Errors from pushing a frame to a single connection.
#[derive(Debug, PartialEq)]
pub enum TransportErrorKind {
    /// The connection's outbound channel has been closed by its socket task.
    ConnectionClosed,
    /// The transport has no record of the connection.
    UnknownConnection,
    /// The outbound event could not be encoded.
    Serialization,
}

impl Error {
    pub fn transport(kind: TransportErrorKind) -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Transport(kind),
        }
    }

    pub fn service_stopped() -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::ServiceStopped,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Presence Error: {:?}", self.error_kind)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Transport(TransportErrorKind::Serialization),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::service_stopped()
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(err: tokio::sync::oneshot::error::RecvError) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::ServiceStopped,
        }
    }
}
