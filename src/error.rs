use bson::oid;
use std::{error, fmt, io, result, sync};

/// The result type for topology and server selection operations.
pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Invalid arguments were provided.
    ArgumentError(String),
    /// A server or topology operation failed.
    OperationError(String),
    /// A server returned a malformed status reply.
    ResponseError(String),
    /// No eligible server was found before the selection timeout elapsed.
    SelectionTimeoutError(SelectionTimeoutError),
    OIDError(oid::Error),
    IoError(io::Error),
    LockError,
}

/// Details of a server selection attempt that ran out of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTimeoutError {
    /// Time spent looking for an eligible server, in milliseconds.
    pub elapsed_ms: i64,
    /// The configured serverSelectionTimeoutMS bound.
    pub timeout_ms: i64,
}

impl From<oid::Error> for Error {
    fn from(err: oid::Error) -> Error {
        Error::OIDError(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl<T> From<sync::PoisonError<T>> for Error {
    fn from(_: sync::PoisonError<T>) -> Error {
        Error::LockError
    }
}

impl fmt::Display for SelectionTimeoutError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "No eligible server found after {} ms (serverSelectionTimeoutMS: {}).",
            self.elapsed_ms, self.timeout_ms
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ArgumentError(ref inner) => inner.fmt(fmt),
            Error::OperationError(ref inner) => inner.fmt(fmt),
            Error::ResponseError(ref inner) => inner.fmt(fmt),
            Error::SelectionTimeoutError(ref inner) => inner.fmt(fmt),
            Error::OIDError(ref inner) => inner.fmt(fmt),
            Error::IoError(ref inner) => inner.fmt(fmt),
            Error::LockError => write!(fmt, "Lock poisoned."),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::OIDError(ref inner) => Some(inner),
            Error::IoError(ref inner) => Some(inner),
            _ => None,
        }
    }
}
