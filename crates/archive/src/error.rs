use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file is not a tar, zip, gzip or xz archive.
    #[display("unsupported archive: {_0}")]
    Unsupported(#[error(not(source))] String),
    /// The archive structure could not be read.
    #[display("corrupted archive")]
    Corrupted,
    /// A member path is absolute or escapes the extraction directory.
    #[display("unsafe member path: {_0}")]
    UnsafePath(#[error(not(source))] String),
    /// The operation requires a different kind of archive (e.g. listing
    /// members of a single-stream file).
    #[display("operation not supported for {_0} archives")]
    WrongFormat(#[error(not(source))] &'static str),
    /// Decoding a compressed stream failed.
    Decompression,
    /// An I/O operation failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}
