//! Errors that are returned by tally.

use std::{borrow::Cow, error::Error as StdError, fmt};

/// Result that is a wrapper of `Result<T, tally::Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All kinds of error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A configuration value is invalid (e.g. zero buckets, non-positive width).
    Invalid,
    /// The operation is not supported by the receiver (e.g. read on a client transport).
    Unsupported,
    /// The transport has been closed, or was never opened.
    NotOpen,
    /// Another operation of the same kind is already in flight.
    Busy,
    /// The buffered payload exceeds the maximum UDP packet size.
    PacketTooLarge,
    /// We don't know what happened here, and no actions other than just returning it back.
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => f.write_str("Invalid"),
            Self::Unsupported => f.write_str("Unsupported"),
            Self::NotOpen => f.write_str("NotOpen"),
            Self::Busy => f.write_str("Busy"),
            Self::PacketTooLarge => f.write_str("PacketTooLarge"),
            Self::Unexpected => f.write_str("Unexpected"),
        }
    }
}

/// The error struct returned by all tally functions.
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
    source: Option<anyhow::Error>,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|v| v.as_ref())
    }
}

impl Error {
    /// Create a new [`Error`] with error kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    /// Create a new invalid [`Error`] with message.
    pub fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    /// Create a new unsupported [`Error`] with message.
    pub fn unsupported(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    /// Create a new not-open [`Error`] with message.
    pub fn not_open(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::NotOpen, message)
    }

    /// Create a new busy [`Error`] with message.
    pub fn busy(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Busy, message)
    }

    /// Create a new unexpected [`Error`] with message.
    pub fn unexpected(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    /// Set source for error.
    pub fn set_source(mut self, src: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "the source error has been set");
        self.source = Some(src.into());
        self
    }

    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message of the error.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::unexpected("i/o operation failed").set_source(err)
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind() {
            ErrorKind::NotOpen => std::io::ErrorKind::NotConnected,
            ErrorKind::Busy => std::io::ErrorKind::WouldBlock,
            ErrorKind::PacketTooLarge => std::io::ErrorKind::InvalidData,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid("number of buckets cannot be zero");
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(err.to_string(), "Invalid => number of buckets cannot be zero");
    }

    #[test]
    fn test_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::not_open("socket closed").set_source(io);
        assert_eq!(err.kind(), ErrorKind::NotOpen);
        assert!(err.source().is_some());
    }
}
