//! Decoding of the single-stream compression formats found in downloads.
//!
//! [`Compression`] is detected from a file's leading bytes or, failing that,
//! its suffix (see [`Compression::from_file`]), and then used to wrap a reader
//! or to decode a whole file. Only decoding is provided; nothing written by
//! ferry is compressed.

mod decode;
mod detect;
pub mod error;

use crate::error::{Error, ErrorKind};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// A single-stream compression layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Plain bytes.
    #[default]
    None,
    Bzip2,
    /// Gzip, including concatenated multi-member streams.
    Gzip,
    /// XZ, or a legacy LZMA-alone stream.
    Xz,
}

impl Compression {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Bzip2 => "bzip2",
            Compression::Gzip => "gzip",
            Compression::Xz => "xz",
        }
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "none" => Compression::None,
            "bz2" | "bzip2" => Compression::Bzip2,
            "gz" | "gzip" => Compression::Gzip,
            "xz" | "lzma" => Compression::Xz,
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        })
    }
}
