use super::{CachedFile, json_from_row};
use crate::error::Error;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// A base remote location grouping downloadable files under one [`Api`](super::Api).
#[derive(Clone, Debug, PartialEq)]
pub struct Source {
    pub id: i64,
    pub api_id: i64,
    /// Discriminator reserved for alternative source kinds.
    pub source_type: String,
    pub base_url: String,
    /// Local directory all of this source's files are stored below.
    pub data_dir: PathBuf,
    pub meta: Option<Value>,
}

impl Source {
    /// Resolves a stored relative path against [`data_dir`](Self::data_dir).
    /// Absolute paths are returned unchanged.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.data_dir.join(path)
    }

    /// The on-disk location of a cached file's download.
    pub fn cached_file_path(&self, file: &CachedFile) -> PathBuf {
        self.resolve(file.local_path())
    }

    /// The directory an archive's members are extracted into: `extract_to`
    /// when set, otherwise the directory holding the archive itself.
    pub fn extract_dir(&self, file: &CachedFile) -> PathBuf {
        match &file.extract_to {
            Some(extract_to) => self.resolve(extract_to),
            None => {
                let full_path = self.cached_file_path(file);
                full_path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.data_dir.clone())
            },
        }
    }

    /// Inverse of [`resolve`](Self::resolve): strips `data_dir` from paths
    /// below it so they are stored relative to the source.
    pub fn relativize(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        path.strip_prefix(&self.data_dir).map(Path::to_path_buf).unwrap_or_else(|_| path.to_path_buf())
    }
}

/// A source to insert.
#[derive(Clone, Debug, PartialEq)]
pub struct NewSource {
    pub api_id: i64,
    pub base_url: String,
    pub data_dir: PathBuf,
    pub source_type: String,
    pub meta: Option<Value>,
}

impl NewSource {
    pub fn new(api_id: i64, base_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_id,
            base_url: base_url.into(),
            data_dir: data_dir.into(),
            source_type: "source".to_string(),
            meta: None,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SourceRow {
    id: i64,
    api_config_id: i64,
    source_type: String,
    base_url: String,
    data_dir: String,
    meta: Option<String>,
}
impl TryFrom<SourceRow> for Source {
    type Error = Error;
    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            api_id: row.api_config_id,
            source_type: row.source_type,
            base_url: row.base_url,
            data_dir: PathBuf::from(row.data_dir),
            meta: json_from_row(row.meta, "source meta")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CachedFile, ExpectedMode};

    fn source() -> Source {
        Source {
            id: 1,
            api_id: 1,
            source_type: "source".to_string(),
            base_url: "https://example.test".to_string(),
            data_dir: PathBuf::from("/data/acme"),
            meta: None,
        }
    }

    fn cached_file(path: &str, extract_to: Option<&str>) -> CachedFile {
        CachedFile {
            id: 1,
            source_id: 1,
            url: "files/bundle.tar.gz?version=2".to_string(),
            url_params: None,
            path: PathBuf::from(path),
            last_download: None,
            last_update: None,
            refresh_interval: None,
            hash: None,
            cache_type: "cached_file".to_string(),
            size: None,
            is_archive: true,
            extract_to: extract_to.map(PathBuf::from),
            expected_mode: ExpectedMode::Auto,
            meta: None,
        }
    }

    #[test]
    fn test_paths() {
        let source = source();
        let file = cached_file("raw/bundle.tar.gz", None);
        assert_eq!(source.cached_file_path(&file), PathBuf::from("/data/acme/raw/bundle.tar.gz"));
        assert_eq!(source.extract_dir(&file), PathBuf::from("/data/acme/raw"));

        let file = cached_file("raw/bundle.tar.gz", Some("extracted"));
        assert_eq!(source.extract_dir(&file), PathBuf::from("/data/acme/extracted"));
    }

    #[test]
    fn test_path_falls_back_to_url_segment() {
        let source = source();
        let file = cached_file("", None);
        assert_eq!(source.cached_file_path(&file), PathBuf::from("/data/acme/bundle.tar.gz"));
    }

    #[test]
    fn test_relativize() {
        let source = source();
        assert_eq!(source.relativize("/data/acme/raw/a.csv"), PathBuf::from("raw/a.csv"));
        assert_eq!(source.relativize("/elsewhere/a.csv"), PathBuf::from("/elsewhere/a.csv"));
        assert_eq!(source.resolve(source.relativize("/data/acme/raw/a.csv")), PathBuf::from("/data/acme/raw/a.csv"));
    }
}
