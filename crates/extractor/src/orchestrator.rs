//! The per-run download orchestrator.
//!
//! A run walks through:
//! 1. select candidate cached files;
//! 2. fetch them batch by batch, writing each batch's outcomes back in one
//!    transaction;
//! 3. preprocess the fetched files (or every file of the API);
//! 4. reconcile the resulting descriptors with the `expected_file` table in
//!    one batched insert and one batched update;
//! 5. return the resolved path of every expected file of the API.
//!
//! Individual fetch failures never abort a run; they are logged and retried
//! on the next run.

use crate::error::{ErrorKind, Result};
use crate::preprocess::preprocess;
use exn::{OptionExt, ResultExt};
use ferry_cache::Repository;
use ferry_cache::models::{Api, CachedFile, CachedFileUpdate, ExpectedFile, ExpectedFileUpdate, NewExpectedFile, Source};
use ferry_config::{Concurrency, ExtractSettings, Generation, OnDiskCheck};
use ferry_fetch::{Credentials, FetchOutcome, FetchTask, Fetcher};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use time::Duration;
use tracing::{debug, info, instrument, warn};

/// How the API of a run is identified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiRef {
    Id(i64),
    Name(String),
    /// An already-loaded row; it is re-read at the start of the run.
    Loaded(Api),
}
impl From<i64> for ApiRef {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}
impl From<&str> for ApiRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}
impl From<String> for ApiRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}
impl From<Api> for ApiRef {
    fn from(api: Api) -> Self {
        Self::Loaded(api)
    }
}
impl Display for ApiRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Name(name) => f.write_str(name),
            Self::Loaded(api) => f.write_str(&api.name),
        }
    }
}

/// Downloads, extracts and reconciles the cached files of one API at a time.
pub struct Extractor {
    repo: Repository,
    fetcher: Fetcher,
    settings: ExtractSettings,
}

impl Extractor {
    pub fn new(repo: Repository, fetcher: Fetcher, settings: ExtractSettings) -> Self {
        Self { repo, fetcher, settings }
    }

    pub fn settings(&self) -> &ExtractSettings {
        &self.settings
    }

    /// Load the API row for `api`.
    pub async fn resolve_api(&self, api: &ApiRef) -> Result<Api> {
        let found = match api {
            ApiRef::Id(id) => self.repo.get_api(*id).await,
            ApiRef::Name(name) => self.repo.get_api_by_name(name).await,
            ApiRef::Loaded(api) => self.repo.get_api(api.id).await,
        };
        found.or_raise(|| ErrorKind::Cache)?.ok_or_raise(|| ErrorKind::ApiNotFound(api.to_string()))
    }

    /// Run the orchestrator for one API and return the local paths of all
    /// its expected files, in persisted order.
    ///
    /// # Errors
    /// Fails fast for [`Concurrency::Async`]; aborts on cache errors and on
    /// [`ErrorKind::InvalidConfiguration`] from preprocessing.
    pub async fn extract(&self, api: impl Into<ApiRef>) -> Result<Vec<PathBuf>> {
        self.run(&api.into()).await
    }

    #[instrument(skip_all, fields(api = %api))]
    async fn run(&self, api: &ApiRef) -> Result<Vec<PathBuf>> {
        self.settings.validate().or_raise(|| ErrorKind::Settings)?;
        if self.settings.concurrency == Concurrency::Async {
            exn::bail!(ErrorKind::Unimplemented("async concurrency"));
        }
        let api = self.resolve_api(api).await?;
        let fetcher = match self.repo.get_creds(api.id).await.or_raise(|| ErrorKind::Cache)? {
            Some(creds) => self.fetcher.clone().with_credentials(Credentials::from(&creds.details)),
            None => self.fetcher.clone(),
        };

        let sources: HashMap<i64, Source> = self
            .repo
            .list_sources(api.id)
            .await
            .or_raise(|| ErrorKind::Cache)?
            .into_iter()
            .map(|source| (source.id, source))
            .collect();
        let candidates = self.candidates(&api, &sources).await?;
        info!(candidates = candidates.len(), "selected cached files");

        let default_refresh = Duration::try_from(self.settings.default_refresh_interval()).unwrap_or(Duration::MAX);
        let mut fetched = HashSet::new();
        for batch in candidates.chunks(self.settings.batch_size) {
            let tasks: Vec<FetchTask> = batch
                .iter()
                .filter_map(|file| sources.get(&file.source_id).map(|source| FetchTask::new(source, file, default_refresh)))
                .collect();
            let outcomes = match self.settings.concurrency {
                Concurrency::Sync => fetch_sequentially(&fetcher, tasks).await,
                Concurrency::Multiprocess => fetch_concurrently(&fetcher, tasks, self.settings.workers).await,
                Concurrency::Async => exn::bail!(ErrorKind::Unimplemented("async concurrency")),
            };
            let updates: Vec<CachedFileUpdate> = outcomes.into_iter().map(CachedFileUpdate::from).collect();
            fetched.extend(updates.iter().map(|update| update.id));
            let updated = self.repo.update_cached_files(&updates).await.or_raise(|| ErrorKind::Cache)?;
            info!(batch = batch.len(), downloaded = updated, "batch complete");
        }

        let to_preprocess = match self.settings.expected_file_generation {
            Generation::Full => self.repo.list_cached_files_for_api(api.id).await.or_raise(|| ErrorKind::Cache)?,
            Generation::Incremental => candidates.into_iter().filter(|file| fetched.contains(&file.id)).collect(),
        };
        self.reconcile(&api, &sources, to_preprocess).await?;
        self.artifact_paths(&api, &sources).await
    }

    async fn candidates(&self, api: &Api, sources: &HashMap<i64, Source>) -> Result<Vec<CachedFile>> {
        let files = match (self.settings.skip_existing_files, self.settings.on_disk_check) {
            (true, OnDiskCheck::Hash) => self.repo.list_unhashed_cached_files_for_api(api.id).await,
            _ => self.repo.list_cached_files_for_api(api.id).await,
        }
        .or_raise(|| ErrorKind::Cache)?;
        if !(self.settings.skip_existing_files && self.settings.on_disk_check == OnDiskCheck::Full) {
            return Ok(files);
        }
        Ok(files
            .into_iter()
            .filter(|file| sources.get(&file.source_id).is_some_and(|source| !source.cached_file_path(file).exists()))
            .collect())
    }

    /// Preprocess `files` and persist the descriptors: unknown
    /// `(path, cached file)` pairs are inserted, known ones updated.
    async fn reconcile(&self, api: &Api, sources: &HashMap<i64, Source>, files: Vec<CachedFile>) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = files.iter().map(|file| file.id).collect();
        let keys = self.repo.expected_file_keys(&ids).await.or_raise(|| ErrorKind::Cache)?;
        let mut existing: HashMap<i64, Vec<ExpectedFile>> = HashMap::new();
        for row in self.repo.list_expected_files_for_api(api.id).await.or_raise(|| ErrorKind::Cache)? {
            existing.entry(row.cached_file_id).or_default().push(row);
        }

        let mut inserts: Vec<NewExpectedFile> = Vec::new();
        let mut updates: Vec<ExpectedFileUpdate> = Vec::new();
        let mut queued = HashSet::new();
        for file in files {
            let Some(source) = sources.get(&file.source_id).cloned() else {
                continue;
            };
            let rows = existing.remove(&file.id).unwrap_or_default();
            let overwrite = self.settings.overwrite_on_extract;
            let file_id = file.id;
            let descriptors = tokio::task::spawn_blocking(move || preprocess(&source, &file, &rows, overwrite))
                .await
                .or_raise(|| ErrorKind::Worker)?;
            let descriptors = match descriptors {
                Ok(descriptors) => descriptors,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(cached_file = file_id, error = ?err, "could not preprocess file");
                    continue;
                },
            };
            for descriptor in descriptors {
                let key = (descriptor.path.clone(), descriptor.cached_file_id);
                match keys.get(&key) {
                    Some(&id) => updates.push(ExpectedFileUpdate {
                        id,
                        archive_path: descriptor.archive_path,
                        size: descriptor.size,
                        file_type: descriptor.file_type,
                    }),
                    None if queued.insert(key) => inserts.push(descriptor),
                    None => debug!(path = %descriptor.path.display(), "duplicate descriptor"),
                }
            }
        }

        let inserted = self.repo.insert_expected_files(&inserts).await.or_raise(|| ErrorKind::Cache)?;
        let updated = self.repo.update_expected_files(&updates).await.or_raise(|| ErrorKind::Cache)?;
        info!(inserted, updated, "reconciled expected files");
        Ok(())
    }

    async fn artifact_paths(&self, api: &Api, sources: &HashMap<i64, Source>) -> Result<Vec<PathBuf>> {
        let owners: HashMap<i64, i64> = self
            .repo
            .list_cached_files_for_api(api.id)
            .await
            .or_raise(|| ErrorKind::Cache)?
            .into_iter()
            .map(|file| (file.id, file.source_id))
            .collect();
        let rows = self.repo.list_expected_files_for_api(api.id).await.or_raise(|| ErrorKind::Cache)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let source = owners.get(&row.cached_file_id).and_then(|source_id| sources.get(source_id))?;
                Some(source.resolve(&row.path))
            })
            .collect())
    }
}

async fn fetch_sequentially(fetcher: &Fetcher, tasks: Vec<FetchTask>) -> Vec<FetchOutcome> {
    let mut outcomes = Vec::new();
    for task in tasks {
        if let Some(outcome) = fetcher.fetch_or_warn(task).await {
            outcomes.push(outcome);
        }
    }
    outcomes
}

/// Fan `tasks` out over at most `workers` spawned tasks. Outcomes arrive in
/// completion order; each one names its cached file.
async fn fetch_concurrently(fetcher: &Fetcher, tasks: Vec<FetchTask>, workers: usize) -> Vec<FetchOutcome> {
    let spawn = |task: FetchTask| {
        let fetcher = fetcher.clone();
        tokio::spawn(async move { fetcher.fetch_or_warn(task).await })
    };
    let mut pending = tasks.into_iter();
    let mut running = FuturesUnordered::new();
    running.extend(pending.by_ref().take(workers.max(1)).map(&spawn));
    let mut outcomes = Vec::new();
    while let Some(joined) = running.next().await {
        match joined {
            Ok(Some(outcome)) => outcomes.push(outcome),
            Ok(None) => {},
            Err(err) => warn!(error = %err, "fetch worker failed"),
        }
        if let Some(task) = pending.next() {
            running.push(spawn(task));
        }
    }
    outcomes
}
