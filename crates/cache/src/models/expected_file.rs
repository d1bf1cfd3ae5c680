use super::{json_from_row, size_from_row, timestamp_from_row};
use crate::error::Error;
use serde_json::Value;
use std::path::PathBuf;
use time::OffsetDateTime;

/// One artifact expected after a [`CachedFile`](super::CachedFile) is fetched
/// and (possibly) extracted.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpectedFile {
    pub id: i64,
    pub cached_file_id: i64,
    /// Relative to the owning source's data directory, or absolute.
    pub path: PathBuf,
    /// Location of the artifact inside its archive, if any.
    pub archive_path: Option<PathBuf>,
    /// Written by the transform stage.
    pub hash: Option<String>,
    pub size: Option<u64>,
    /// Written by the transform stage.
    pub processed: bool,
    pub file_type: Option<String>,
    /// Written by the transform stage.
    pub last_processed: Option<OffsetDateTime>,
    pub meta: Option<Value>,
}

/// An expected file to insert, also used as the descriptor produced by
/// archive preprocessing before reconciliation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewExpectedFile {
    pub cached_file_id: i64,
    pub path: PathBuf,
    pub archive_path: Option<PathBuf>,
    pub size: Option<u64>,
    pub file_type: Option<String>,
    pub meta: Option<Value>,
}

impl NewExpectedFile {
    pub fn new(cached_file_id: i64, path: impl Into<PathBuf>) -> Self {
        Self { cached_file_id, path: path.into(), ..Default::default() }
    }

    pub fn archive_path(mut self, archive_path: impl Into<PathBuf>) -> Self {
        self.archive_path = Some(archive_path.into());
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Refreshes the fields preprocessing knows about on an existing row.
/// `None` leaves the stored value untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpectedFileUpdate {
    pub id: i64,
    pub archive_path: Option<PathBuf>,
    pub size: Option<u64>,
    pub file_type: Option<String>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ExpectedFileRow {
    id: i64,
    cached_file_id: i64,
    path: String,
    archive_path: Option<String>,
    hash: Option<String>,
    size: Option<i64>,
    processed: bool,
    file_type: Option<String>,
    last_processed: Option<i64>,
    meta: Option<String>,
}
impl TryFrom<ExpectedFileRow> for ExpectedFile {
    type Error = Error;
    fn try_from(row: ExpectedFileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            cached_file_id: row.cached_file_id,
            path: PathBuf::from(row.path),
            archive_path: row.archive_path.map(PathBuf::from),
            hash: row.hash,
            size: size_from_row(row.size, "expected file size")?,
            processed: row.processed,
            file_type: row.file_type,
            last_processed: timestamp_from_row(row.last_processed, "last processed")?,
            meta: json_from_row(row.meta, "expected file meta")?,
        })
    }
}
