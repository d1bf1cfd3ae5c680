//! Repository over the API → Source → CachedFile → ExpectedFile tree.
//!
//! All inserts go through a "get or create" path: an insert that trips a
//! uniqueness constraint re-queries and returns the row that won, so callers
//! never see a conflict for rows identified by their natural key.

use crate::Database;
use crate::chain::{ApiTree, SourceTree};
use crate::error::{ErrorKind, Result};
use crate::models::{
    Api, ApiRow, CachedFile, CachedFileRow, CachedFileUpdate, Creds, CredsDetails, CredsRow, ExpectedFile,
    ExpectedFileRow, ExpectedFileUpdate, NewCachedFile, NewExpectedFile, NewSource, Source, SourceRow,
    json_to_row, optional_path_to_row, path_to_row, size_to_row,
};
use exn::{OptionExt, ResultExt};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, instrument};

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER` is 32766; six binds per
/// expected file keeps a chunk well below it.
const INSERT_CHUNK: usize = 1000;
const LOOKUP_CHUNK: usize = 10_000;

/// `(path, cached file id)` → expected file id.
pub type ExpectedFileKeys = HashMap<(PathBuf, i64), i64>;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Repository for the configuration and cache state.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // API
    // =========================================================================

    pub async fn get_api(&self, id: i64) -> Result<Option<Api>> {
        let row: Option<ApiRow> = sqlx::query_as(include_str!("../queries/get_api.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(Api::from))
    }

    pub async fn get_api_by_name(&self, name: impl AsRef<str>) -> Result<Option<Api>> {
        let row: Option<ApiRow> = sqlx::query_as(include_str!("../queries/get_api_by_name.sql"))
            .bind(name.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(Api::from))
    }

    /// Returns the API named `name`, creating it if it does not exist yet.
    /// An existing API keeps its description.
    #[instrument(skip(self, description))]
    pub async fn get_or_create_api(&self, name: &str, description: Option<&str>) -> Result<Api> {
        if let Some(api) = self.get_api_by_name(name).await? {
            return Ok(api);
        }
        let inserted: sqlx::Result<ApiRow> = sqlx::query_as(include_str!("../queries/insert_api.sql"))
            .bind(name)
            .bind(description)
            .fetch_one(&self.pool)
            .await;
        match inserted {
            Ok(row) => Ok(row.into()),
            Err(err) if is_unique_violation(&err) => {
                debug!("api created concurrently, re-querying");
                self.get_api_by_name(name).await?.ok_or_raise(|| ErrorKind::NotFound("api"))
            },
            Err(err) => Err(err).or_raise(|| ErrorKind::Database),
        }
    }

    /// Deletes an API together with its credentials, sources, cached files
    /// and expected files. Returns `false` if no such API existed.
    pub async fn delete_api(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_api.sql"))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    pub async fn get_creds(&self, api_id: i64) -> Result<Option<Creds>> {
        let row: Option<CredsRow> = sqlx::query_as(include_str!("../queries/get_creds.sql"))
            .bind(api_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Creds::try_from).transpose()
    }

    /// Stores (or replaces) the credentials of an API.
    pub async fn set_creds(&self, api_id: i64, details: &CredsDetails) -> Result<()> {
        let details = serde_json::to_string(details).or_raise(|| ErrorKind::InvalidData("creds details"))?;
        sqlx::query(include_str!("../queries/upsert_creds.sql"))
            .bind(api_id)
            .bind(details)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Source
    // =========================================================================

    async fn find_source(&self, api_id: i64, base_url: &str, data_dir: &str) -> Result<Option<Source>> {
        let row: Option<SourceRow> = sqlx::query_as(include_str!("../queries/get_source.sql"))
            .bind(api_id)
            .bind(base_url)
            .bind(data_dir)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Source::try_from).transpose()
    }

    /// Returns the source identified by `(api, base_url, data_dir)`, creating
    /// it if needed.
    #[instrument(skip_all, fields(api_id = new.api_id, base_url = %new.base_url))]
    pub async fn get_or_create_source(&self, new: &NewSource) -> Result<Source> {
        let data_dir = path_to_row(&new.data_dir, "data dir")?;
        if let Some(source) = self.find_source(new.api_id, &new.base_url, &data_dir).await? {
            return Ok(source);
        }
        let inserted: sqlx::Result<SourceRow> = sqlx::query_as(include_str!("../queries/insert_source.sql"))
            .bind(new.api_id)
            .bind(&new.source_type)
            .bind(&new.base_url)
            .bind(&data_dir)
            .bind(json_to_row(new.meta.as_ref(), "source meta")?)
            .fetch_one(&self.pool)
            .await;
        match inserted {
            Ok(row) => row.try_into(),
            Err(err) if is_unique_violation(&err) => self
                .find_source(new.api_id, &new.base_url, &data_dir)
                .await?
                .ok_or_raise(|| ErrorKind::NotFound("source")),
            Err(err) => Err(err).or_raise(|| ErrorKind::Database),
        }
    }

    /// Sources of an API in persisted order.
    pub async fn list_sources(&self, api_id: i64) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(include_str!("../queries/list_sources_for_api.sql"))
            .bind(api_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Source::try_from).collect()
    }

    /// Deletes a source and, by cascade, its cached and expected files.
    pub async fn delete_source(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_source.sql"))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Cached File
    // =========================================================================

    pub async fn get_cached_file(&self, id: i64) -> Result<Option<CachedFile>> {
        let row: Option<CachedFileRow> = sqlx::query_as(include_str!("../queries/get_cached_file_by_id.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CachedFile::try_from).transpose()
    }

    async fn find_cached_file(&self, source_id: i64, url: &str, path: &str) -> Result<Option<CachedFile>> {
        let row: Option<CachedFileRow> = sqlx::query_as(include_str!("../queries/get_cached_file.sql"))
            .bind(source_id)
            .bind(url)
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CachedFile::try_from).transpose()
    }

    /// Returns the cached file identified by `(source, url, path)`, creating
    /// it if needed.
    #[instrument(skip_all, fields(source_id = new.source_id, url = %new.url))]
    pub async fn get_or_create_cached_file(&self, new: &NewCachedFile) -> Result<CachedFile> {
        let path = path_to_row(&new.path, "cached file path")?;
        if let Some(file) = self.find_cached_file(new.source_id, &new.url, &path).await? {
            return Ok(file);
        }
        let url_params = match &new.url_params {
            Some(params) => Some(serde_json::to_string(params).or_raise(|| ErrorKind::InvalidData("url params"))?),
            None => None,
        };
        let inserted: sqlx::Result<CachedFileRow> = sqlx::query_as(include_str!("../queries/insert_cached_file.sql"))
            .bind(new.source_id)
            .bind(&new.url)
            .bind(url_params)
            .bind(&path)
            .bind(new.refresh_interval.map(|interval| interval.whole_seconds()))
            .bind(&new.cache_type)
            .bind(new.is_archive)
            .bind(optional_path_to_row(new.extract_to.as_ref(), "extract to")?)
            .bind(new.expected_mode.as_str())
            .bind(json_to_row(new.meta.as_ref(), "cached file meta")?)
            .fetch_one(&self.pool)
            .await;
        match inserted {
            Ok(row) => row.try_into(),
            Err(err) if is_unique_violation(&err) => self
                .find_cached_file(new.source_id, &new.url, &path)
                .await?
                .ok_or_raise(|| ErrorKind::NotFound("cached file")),
            Err(err) => Err(err).or_raise(|| ErrorKind::Database),
        }
    }

    pub async fn list_cached_files_for_source(&self, source_id: i64) -> Result<Vec<CachedFile>> {
        let rows: Vec<CachedFileRow> = sqlx::query_as(include_str!("../queries/list_cached_files_for_source.sql"))
            .bind(source_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CachedFile::try_from).collect()
    }

    /// Every cached file of an API, in persisted order.
    pub async fn list_cached_files_for_api(&self, api_id: i64) -> Result<Vec<CachedFile>> {
        let rows: Vec<CachedFileRow> = sqlx::query_as(include_str!("../queries/list_cached_files_for_api.sql"))
            .bind(api_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CachedFile::try_from).collect()
    }

    /// Cached files of an API that have never been fetched successfully
    /// (no stored hash).
    pub async fn list_unhashed_cached_files_for_api(&self, api_id: i64) -> Result<Vec<CachedFile>> {
        let rows: Vec<CachedFileRow> =
            sqlx::query_as(include_str!("../queries/list_unhashed_cached_files_for_api.sql"))
                .bind(api_id)
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CachedFile::try_from).collect()
    }

    /// Writes fetch results back in a single transaction.
    ///
    /// Returns the number of rows updated.
    #[instrument(skip_all, fields(count = updates.len()))]
    pub async fn update_cached_files(&self, updates: &[CachedFileUpdate]) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut affected = 0;
        for update in updates {
            let size = i64::try_from(update.size).or_raise(|| ErrorKind::InvalidData("cached file size"))?;
            affected += sqlx::query(include_str!("../queries/update_cached_file_fetch.sql"))
                .bind(&update.hash)
                .bind(update.last_download.unix_timestamp())
                .bind(size)
                .bind(update.id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(affected)
    }

    /// Deletes a cached file and, by cascade, its expected files.
    pub async fn delete_cached_file(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_cached_file.sql"))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Expected File
    // =========================================================================

    async fn find_expected_file(&self, path: &str, cached_file_id: i64) -> Result<Option<ExpectedFile>> {
        let row: Option<ExpectedFileRow> = sqlx::query_as(include_str!("../queries/get_expected_file.sql"))
            .bind(path)
            .bind(cached_file_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(ExpectedFile::try_from).transpose()
    }

    /// Returns the expected file identified by `(path, cached file)`,
    /// creating it if needed.
    pub async fn get_or_create_expected_file(&self, new: &NewExpectedFile) -> Result<ExpectedFile> {
        let path = path_to_row(&new.path, "expected file path")?;
        if let Some(file) = self.find_expected_file(&path, new.cached_file_id).await? {
            return Ok(file);
        }
        let inserted: sqlx::Result<ExpectedFileRow> =
            sqlx::query_as(include_str!("../queries/insert_expected_file.sql"))
                .bind(new.cached_file_id)
                .bind(&path)
                .bind(optional_path_to_row(new.archive_path.as_ref(), "archive path")?)
                .bind(size_to_row(new.size, "expected file size")?)
                .bind(new.file_type.as_deref())
                .bind(json_to_row(new.meta.as_ref(), "expected file meta")?)
                .fetch_one(&self.pool)
                .await;
        match inserted {
            Ok(row) => row.try_into(),
            Err(err) if is_unique_violation(&err) => self
                .find_expected_file(&path, new.cached_file_id)
                .await?
                .ok_or_raise(|| ErrorKind::NotFound("expected file")),
            Err(err) => Err(err).or_raise(|| ErrorKind::Database),
        }
    }

    pub async fn list_expected_files(&self, cached_file_id: i64) -> Result<Vec<ExpectedFile>> {
        let rows: Vec<ExpectedFileRow> =
            sqlx::query_as(include_str!("../queries/list_expected_files_for_cached_file.sql"))
                .bind(cached_file_id)
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ExpectedFile::try_from).collect()
    }

    /// Every expected file of an API, in persisted order.
    pub async fn list_expected_files_for_api(&self, api_id: i64) -> Result<Vec<ExpectedFile>> {
        let rows: Vec<ExpectedFileRow> =
            sqlx::query_as(include_str!("../queries/list_expected_files_for_api.sql"))
                .bind(api_id)
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ExpectedFile::try_from).collect()
    }

    /// Builds the `(path, cached file id) → id` lookup for the given cached files.
    pub async fn expected_file_keys(&self, cached_file_ids: &[i64]) -> Result<ExpectedFileKeys> {
        let mut keys = ExpectedFileKeys::new();
        for chunk in cached_file_ids.chunks(LOOKUP_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT id, path, cached_file_id FROM expected_file WHERE cached_file_id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            let rows: Vec<(i64, String, i64)> =
                builder.build_query_as().fetch_all(&self.pool).await.or_raise(|| ErrorKind::Database)?;
            keys.extend(rows.into_iter().map(|(id, path, cached_file_id)| ((PathBuf::from(path), cached_file_id), id)));
        }
        Ok(keys)
    }

    /// Inserts expected files in multi-row statements inside one transaction.
    /// Rows that already exist are left untouched.
    ///
    /// Returns the number of rows inserted.
    #[instrument(skip_all, fields(count = files.len()))]
    pub async fn insert_expected_files(&self, files: &[NewExpectedFile]) -> Result<u64> {
        if files.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut inserted = 0;
        for chunk in files.chunks(INSERT_CHUNK) {
            let rows = chunk
                .iter()
                .map(|file| {
                    Ok((
                        file.cached_file_id,
                        path_to_row(&file.path, "expected file path")?,
                        optional_path_to_row(file.archive_path.as_ref(), "archive path")?,
                        size_to_row(file.size, "expected file size")?,
                        file.file_type.clone(),
                        json_to_row(file.meta.as_ref(), "expected file meta")?,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO expected_file (cached_file_id, path, archive_path, size, file_type, meta) ",
            );
            builder.push_values(rows, |mut b, (cached_file_id, path, archive_path, size, file_type, meta)| {
                b.push_bind(cached_file_id)
                    .push_bind(path)
                    .push_bind(archive_path)
                    .push_bind(size)
                    .push_bind(file_type)
                    .push_bind(meta);
            });
            builder.push(" ON CONFLICT (path, cached_file_id) DO NOTHING");
            inserted += builder.build().execute(&mut *tx).await.or_raise(|| ErrorKind::Database)?.rows_affected();
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(inserted)
    }

    /// Applies expected file updates by id inside one transaction.
    ///
    /// Returns the number of rows updated.
    #[instrument(skip_all, fields(count = updates.len()))]
    pub async fn update_expected_files(&self, updates: &[ExpectedFileUpdate]) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut affected = 0;
        for update in updates {
            affected += sqlx::query(include_str!("../queries/update_expected_file.sql"))
                .bind(optional_path_to_row(update.archive_path.as_ref(), "archive path")?)
                .bind(size_to_row(update.size, "expected file size")?)
                .bind(update.file_type.as_deref())
                .bind(update.id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(affected)
    }

    // =========================================================================
    // Trees
    // =========================================================================

    /// Loads an API with its sources and cached files for hash-chain computation.
    pub async fn load_tree(&self, api: Api) -> Result<ApiTree> {
        let sources = self.list_sources(api.id).await?;
        let mut trees = Vec::with_capacity(sources.len());
        for source in sources {
            let cached_files = self.list_cached_files_for_source(source.id).await?;
            trees.push(SourceTree { source, cached_files });
        }
        Ok(ApiTree { api, sources: trees })
    }
}
