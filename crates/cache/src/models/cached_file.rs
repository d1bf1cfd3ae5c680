use super::{json_from_row, size_from_row, timestamp_from_row};
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::{Duration, OffsetDateTime};

/// How [`ExpectedFile`](super::ExpectedFile) rows are produced for a cached file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExpectedMode {
    /// One row is synthesized for every archive member not seen before.
    Auto,
    /// Only pre-declared rows are materialized, matched by archive path.
    Explicit,
    /// The download itself is the artifact (non-archives).
    #[default]
    SelfFile,
}

impl ExpectedMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectedMode::Auto => "auto",
            ExpectedMode::Explicit => "explicit",
            ExpectedMode::SelfFile => "self",
        }
    }
}

impl Display for ExpectedMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExpectedMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ExpectedMode::Auto),
            "explicit" => Ok(ExpectedMode::Explicit),
            "self" => Ok(ExpectedMode::SelfFile),
            _ => exn::bail!(ErrorKind::InvalidData("expected mode")),
        }
    }
}

/// One downloadable remote resource and its on-disk cache state.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedFile {
    pub id: i64,
    pub source_id: i64,
    /// Locator relative to the source's base URL (or absolute).
    pub url: String,
    /// Extra query parameters appended to the URL at fetch time.
    pub url_params: Option<Map<String, Value>>,
    /// Target path relative to the source's data directory. May be empty.
    pub path: PathBuf,
    pub last_download: Option<OffsetDateTime>,
    pub last_update: Option<OffsetDateTime>,
    pub refresh_interval: Option<Duration>,
    /// Hex digest of the downloaded bytes; `None` until the first fetch.
    pub hash: Option<String>,
    pub cache_type: String,
    pub size: Option<u64>,
    pub is_archive: bool,
    pub extract_to: Option<PathBuf>,
    pub expected_mode: ExpectedMode,
    pub meta: Option<Value>,
}

impl CachedFile {
    /// The path the download is stored at, relative to the source's data
    /// directory. Falls back to the last segment of the URL when no path is
    /// configured.
    pub fn local_path(&self) -> PathBuf {
        if !self.path.as_os_str().is_empty() {
            return self.path.clone();
        }
        let locator = self.url.split(['?', '#']).next().unwrap_or_default();
        let segment = locator.rsplit('/').find(|segment| !segment.is_empty()).unwrap_or_default();
        Path::new(segment).to_path_buf()
    }
}

/// A cached file to insert.
#[derive(Clone, Debug, PartialEq)]
pub struct NewCachedFile {
    pub source_id: i64,
    pub url: String,
    pub url_params: Option<Map<String, Value>>,
    pub path: PathBuf,
    pub refresh_interval: Option<Duration>,
    pub cache_type: String,
    pub is_archive: bool,
    pub extract_to: Option<PathBuf>,
    pub expected_mode: ExpectedMode,
    pub meta: Option<Value>,
}

impl NewCachedFile {
    pub fn new(source_id: i64, url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id,
            url: url.into(),
            url_params: None,
            path: path.into(),
            refresh_interval: None,
            cache_type: "cached_file".to_string(),
            is_archive: false,
            extract_to: None,
            expected_mode: ExpectedMode::SelfFile,
            meta: None,
        }
    }

    /// Marks the file as an archive extracted under `mode`.
    pub fn archive(mut self, mode: ExpectedMode, extract_to: Option<PathBuf>) -> Self {
        self.is_archive = true;
        self.expected_mode = mode;
        self.extract_to = extract_to;
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    pub fn url_params(mut self, params: Map<String, Value>) -> Self {
        self.url_params = Some(params);
        self
    }
}

/// The state written back after a successful fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedFileUpdate {
    pub id: i64,
    pub hash: String,
    pub last_download: OffsetDateTime,
    pub size: u64,
}

#[derive(sqlx::FromRow)]
pub(crate) struct CachedFileRow {
    id: i64,
    source_id: i64,
    url: String,
    url_params: Option<String>,
    path: String,
    last_download: Option<i64>,
    last_update: Option<i64>,
    refresh_interval: Option<i64>,
    hash: Option<String>,
    cache_type: String,
    size: Option<i64>,
    is_archive: bool,
    extract_to: Option<String>,
    expected_mode: String,
    meta: Option<String>,
}
impl TryFrom<CachedFileRow> for CachedFile {
    type Error = Error;
    fn try_from(row: CachedFileRow) -> Result<Self, Self::Error> {
        let url_params = match json_from_row(row.url_params, "url params")? {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => exn::bail!(ErrorKind::InvalidData("url params")),
        };
        Ok(Self {
            id: row.id,
            source_id: row.source_id,
            url: row.url,
            url_params,
            path: PathBuf::from(row.path),
            last_download: timestamp_from_row(row.last_download, "last download")?,
            last_update: timestamp_from_row(row.last_update, "last update")?,
            refresh_interval: row.refresh_interval.map(Duration::seconds),
            hash: row.hash,
            cache_type: row.cache_type,
            size: size_from_row(row.size, "cached file size")?,
            is_archive: row.is_archive,
            extract_to: row.extract_to.map(PathBuf::from),
            expected_mode: row.expected_mode.parse::<ExpectedMode>().or_raise(|| ErrorKind::InvalidData("expected mode"))?,
            meta: json_from_row(row.meta, "cached file meta")?,
        })
    }
}
