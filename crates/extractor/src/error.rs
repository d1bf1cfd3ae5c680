//! Extractor Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An extractor error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extractor operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested API does not exist.
    #[display("API not found: {_0}")]
    ApiNotFound(#[error(not(source))] String),
    /// Reading or writing the cache database failed.
    #[display("cache error")]
    Cache,
    /// Extracting a downloaded archive failed.
    #[display("archive error")]
    Archive,
    /// The extraction settings were rejected.
    #[display("invalid settings")]
    Settings,
    /// The cached file and its expected files do not fit together; fix the
    /// configuration rows before running again.
    #[display("invalid configuration: {_0}")]
    InvalidConfiguration(#[error(not(source))] String),
    /// The requested capability is not implemented.
    #[display("not implemented: {_0}")]
    Unimplemented(#[error(not(source))] &'static str),
    /// A worker task panicked or was cancelled.
    #[display("worker task failed")]
    Worker,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache | Self::Worker)
    }

    /// Returns `true` for errors that must abort a run rather than skip a
    /// single file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_) | Self::Unimplemented(_) | Self::Cache | Self::Settings)
    }
}
