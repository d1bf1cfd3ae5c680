//! Fetch Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Remote resource does not exist
    #[display("remote resource not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// The server answered with an unexpected status
    #[display("unexpected response status {_0}")]
    Status(#[error(not(source))] u16),
    /// Connection, DNS or protocol failure
    #[display("network error")]
    Network,
    /// Writing the local copy failed
    #[display("I/O error")]
    Io,
    /// The composed locator is not a valid URL
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// No transport is registered for the URL scheme
    #[display("unsupported URL scheme: {_0}")]
    UnsupportedScheme(#[error(not(source))] String),
    /// A transport could not be constructed from its settings
    #[display("transport configuration error: {_0}")]
    Configuration(#[error(not(source))] String),
    /// Hashing the downloaded file failed
    #[display("failed to hash downloaded file")]
    Hash,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network | Self::Io => true,
            Self::Status(status) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
