//! Domain models and their SQLite row representations.
//!
//! Rows mirror the table layout (integers for timestamps and sizes, JSON as
//! text); models carry the typed values the rest of the workspace works with.

mod api;
mod cached_file;
mod expected_file;
mod source;

pub use self::api::{Api, AuthToken, BasicAuth, Cookie, Creds, CredsDetails};
pub use self::cached_file::{CachedFile, CachedFileUpdate, ExpectedMode, NewCachedFile};
pub use self::expected_file::{ExpectedFile, ExpectedFileUpdate, NewExpectedFile};
pub use self::source::{NewSource, Source};

pub(crate) use self::api::{ApiRow, CredsRow};
pub(crate) use self::cached_file::CachedFileRow;
pub(crate) use self::expected_file::ExpectedFileRow;
pub(crate) use self::source::SourceRow;

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use serde_json::Value;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub(crate) fn path_to_row(path: impl AsRef<Path>, field: &'static str) -> Result<String> {
    Ok(path.as_ref().to_str().ok_or_raise(|| ErrorKind::InvalidData(field))?.to_string())
}

pub(crate) fn optional_path_to_row(path: Option<&PathBuf>, field: &'static str) -> Result<Option<String>> {
    path.map(|p| path_to_row(p, field)).transpose()
}

pub(crate) fn timestamp_from_row(value: Option<i64>, field: &'static str) -> Result<Option<OffsetDateTime>> {
    value.map(|ts| OffsetDateTime::from_unix_timestamp(ts).or_raise(|| ErrorKind::InvalidData(field))).transpose()
}

pub(crate) fn size_from_row(value: Option<i64>, field: &'static str) -> Result<Option<u64>> {
    value.map(|size| u64::try_from(size).or_raise(|| ErrorKind::InvalidData(field))).transpose()
}

pub(crate) fn size_to_row(value: Option<u64>, field: &'static str) -> Result<Option<i64>> {
    value.map(|size| i64::try_from(size).or_raise(|| ErrorKind::InvalidData(field))).transpose()
}

pub(crate) fn json_from_row(value: Option<String>, field: &'static str) -> Result<Option<Value>> {
    value.map(|text| serde_json::from_str(&text).or_raise(|| ErrorKind::InvalidData(field))).transpose()
}

pub(crate) fn json_to_row(value: Option<&Value>, field: &'static str) -> Result<Option<String>> {
    value.map(|v| serde_json::to_string(v).or_raise(|| ErrorKind::InvalidData(field))).transpose()
}
