//! The error-kind taxonomy shared across the mesh, transport, search and
//! HTTP layers.
use std::fmt;

use thiserror::Error;

/// The seven error categories every fallible `omesh` API maps onto.
///
/// This is the "kind, not name" taxonomy: callers match on the kind to
/// decide how to react (retry, drop, surface to the user), not on a string.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid caller input: unknown transport, bad port, empty device,
    /// oversized payload.
    Argument,
    /// Operation attempted on a transport or server before `init`.
    NotInitialized,
    /// Send addressed a peer id the backend does not know.
    PeerNotFound,
    /// Recoverable, per-operation link failure: timeout, CRC mismatch,
    /// frame desync, disconnected, buffer full.
    Link,
    /// Malformed mesh message: bad magic, bad length, bad checksum.
    Protocol,
    /// OS-level I/O failure.
    Io,
    /// Fatal initialization failure (listener bind, notification facility).
    FatalInit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Argument => "invalid argument",
            Self::NotInitialized => "not initialized",
            Self::PeerNotFound => "no such peer",
            Self::Link => "link error",
            Self::Protocol => "protocol error",
            Self::Io => "i/o error",
            Self::FatalInit => "fatal initialization error",
        };
        f.write_str(s)
    }
}

/// A generic `omesh` error, carrying a [`ErrorKind`] and a human-readable
/// context string.
#[derive(Error, Debug)]
#[error("{kind}: {context}")]
pub struct Error {
    /// The error category.
    pub kind: ErrorKind,
    /// Context describing what failed.
    pub context: String,
}

impl Error {
    /// Construct a new error of the given kind.
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }

    /// Shorthand for [`ErrorKind::Argument`].
    pub fn argument(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Argument, context)
    }

    /// Shorthand for [`ErrorKind::NotInitialized`].
    pub fn not_initialized(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotInitialized, context)
    }

    /// Shorthand for [`ErrorKind::PeerNotFound`].
    pub fn peer_not_found(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::PeerNotFound, context)
    }

    /// Shorthand for [`ErrorKind::Link`].
    pub fn link(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Link, context)
    }

    /// Shorthand for [`ErrorKind::Protocol`].
    pub fn protocol(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, context)
    }

    /// Shorthand for [`ErrorKind::FatalInit`].
    pub fn fatal_init(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::FatalInit, context)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_context() {
        let err = Error::argument("unknown transport `bluetooth-lte`");
        let rendered = err.to_string();
        assert!(rendered.contains("invalid argument"));
        assert!(rendered.contains("bluetooth-lte"));
    }

    #[test]
    fn io_errors_convert() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: Error = io_err.into();
        assert_eq!(err.kind, ErrorKind::Io);
    }
}
