//! Per-file fetch tasks and the scheme-dispatching [`Fetcher`].

use crate::credentials::Credentials;
use crate::error::{ErrorKind, Result};
use crate::location::build_url;
use crate::staleness::requires_update;
use crate::transport::{FtpTransport, HttpTransport, LocalTransport, Request, Transport};
use exn::{OptionExt, ResultExt};
use ferry_cache::hash::file_hash;
use ferry_cache::models::{CachedFile, CachedFileUpdate, Source};
use ferry_config::{ExtractSettings, Settings};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use time::{Duration, OffsetDateTime};
use tracing::instrument;

pub type TransportHandle = Arc<dyn Transport>;

/// Knobs shared by every fetch of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchOptions {
    pub block_size: usize,
    /// Skip the staleness check and always download.
    pub force_download: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self { block_size: 16 * 1024, force_download: false }
    }
}

impl From<&ExtractSettings> for FetchOptions {
    fn from(settings: &ExtractSettings) -> Self {
        Self { block_size: settings.block_size, force_download: settings.force_download }
    }
}

/// Everything needed to fetch one cached file, copied out of the database
/// rows so it can be moved onto any worker.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchTask {
    pub id: i64,
    pub base_url: String,
    pub url: String,
    pub url_params: Option<Map<String, Value>>,
    /// Absolute local target.
    pub target: PathBuf,
    pub refresh_interval: Duration,
}

impl FetchTask {
    pub fn new(source: &Source, file: &CachedFile, default_refresh: Duration) -> Self {
        Self {
            id: file.id,
            base_url: source.base_url.clone(),
            url: file.url.clone(),
            url_params: file.url_params.clone(),
            target: source.cached_file_path(file),
            refresh_interval: file.refresh_interval.unwrap_or(default_refresh),
        }
    }
}

/// State of a freshly downloaded file, keyed by cached file id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchOutcome {
    pub id: i64,
    pub hash: String,
    pub last_download: OffsetDateTime,
    pub size: u64,
}

impl From<FetchOutcome> for CachedFileUpdate {
    fn from(outcome: FetchOutcome) -> Self {
        Self { id: outcome.id, hash: outcome.hash, last_download: outcome.last_download, size: outcome.size }
    }
}

/// Dispatches fetches to a [`Transport`] by URL scheme.
///
/// Cheap to clone; clones share their transports.
#[derive(Clone)]
pub struct Fetcher {
    transports: HashMap<String, TransportHandle>,
    credentials: Credentials,
    options: FetchOptions,
}

impl Fetcher {
    /// A fetcher with no transports registered.
    pub fn new(options: FetchOptions) -> Self {
        Self { transports: HashMap::new(), credentials: Credentials::default(), options }
    }

    /// A fetcher with every transport the settings allow.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http: TransportHandle = Arc::new(HttpTransport::new(&settings.http)?);
        #[allow(unused_mut)]
        let mut fetcher = Self::new(FetchOptions::from(&settings.extract))
            .with_transport("http", Arc::clone(&http))
            .with_transport("https", http)
            .with_transport("ftp", Arc::new(FtpTransport))
            .with_transport("file", Arc::new(LocalTransport));
        #[cfg(feature = "s3")]
        if let Some(s3) = &settings.s3 {
            fetcher = fetcher.with_transport("s3", Arc::new(crate::transport::S3Transport::new(s3)?));
        }
        Ok(fetcher)
    }

    /// Register (or replace) the transport for `scheme`.
    pub fn with_transport(mut self, scheme: impl Into<String>, transport: TransportHandle) -> Self {
        self.transports.insert(scheme.into().to_ascii_lowercase(), transport);
        self
    }

    /// Attach credentials to every subsequent non-FTP fetch.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn options(&self) -> FetchOptions {
        self.options
    }

    /// Fetch one file if its local copy is stale.
    ///
    /// Returns `None` when the local copy is current, otherwise the new hash,
    /// size and download time.
    #[instrument(skip_all, fields(id = task.id, url = %task.url))]
    pub async fn fetch(&self, task: &FetchTask) -> Result<Option<FetchOutcome>> {
        let url = build_url(&task.base_url, &task.url, task.url_params.as_ref())?;
        let scheme = url.scheme().to_string();
        let transport =
            self.transports.get(&scheme).ok_or_raise(|| ErrorKind::UnsupportedScheme(scheme.clone()))?;
        let mut request = Request::new(url);
        if scheme != "ftp" {
            request = request.with_credentials(self.credentials.clone());
        }
        let transfer = transport.open(&request).await?;

        let now = OffsetDateTime::now_utc();
        let remote_size = transfer.remote_size();
        if !self.options.force_download && !requires_update(&task.target, remote_size, task.refresh_interval, now) {
            tracing::debug!(path = %task.target.display(), ?remote_size, "local copy is current");
            return Ok(None);
        }

        // Staged beside the target; a failed transfer leaves the old copy.
        let staged = staging_path(&task.target)?;
        let written = transfer.write_to(&staged, self.options.block_size).await?;
        staged.persist(&task.target).or_raise(|| ErrorKind::Io)?;
        tracing::debug!(path = %task.target.display(), bytes = written, transport = transport.name(), "downloaded");

        let target = task.target.clone();
        let hash = tokio::task::spawn_blocking(move || file_hash(target))
            .await
            .or_raise(|| ErrorKind::Hash)?
            .or_raise(|| ErrorKind::Hash)?;
        let size = tokio::fs::metadata(&task.target).await.or_raise(|| ErrorKind::Io)?.len();
        Ok(Some(FetchOutcome { id: task.id, hash, last_download: OffsetDateTime::now_utc(), size }))
    }

    /// [`fetch`](Self::fetch), with failures logged and turned into "no update".
    pub async fn fetch_or_warn(&self, task: FetchTask) -> Option<FetchOutcome> {
        match self.fetch(&task).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(id = task.id, url = %task.url, error = ?err, "could not download file");
                None
            },
        }
    }
}

/// A fresh, uniquely named file beside `target`; removed on drop unless
/// persisted.
fn staging_path(target: &Path) -> Result<TempPath> {
    let parent = target.parent().filter(|parent| !parent.as_os_str().is_empty()).unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
    let file = tempfile::Builder::new().prefix(".ferry-").suffix(".part").tempfile_in(parent).or_raise(|| ErrorKind::Io)?;
    Ok(file.into_temp_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{StubTransport, Transfer, create_target};
    use async_trait::async_trait;
    use ferry_cache::models::{AuthToken, Cookie, CredsDetails};
    use tokio::io::AsyncWriteExt;

    const BODY: &[u8] = b"a,b\n1,2\n";

    fn task(dir: &Path, url: &str) -> FetchTask {
        FetchTask {
            id: 7,
            base_url: "https://example.test".to_string(),
            url: url.to_string(),
            url_params: None,
            target: dir.join("data.csv"),
            refresh_interval: Duration::days(7),
        }
    }

    fn fetcher(stub: Arc<StubTransport>) -> Fetcher {
        Fetcher::new(FetchOptions::default()).with_transport("https", stub)
    }

    #[tokio::test]
    async fn test_fetch_writes_and_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubTransport::with_files([("https://example.test/data.csv", BODY)]));
        let outcome = fetcher(stub.clone()).fetch(&task(dir.path(), "data.csv")).await.unwrap().unwrap();
        assert_eq!(outcome.id, 7);
        assert_eq!(outcome.size, 8);
        assert_eq!(outcome.hash, blake3_hex(BODY));
        assert_eq!(std::fs::read(dir.path().join("data.csv")).unwrap(), BODY);
    }

    #[tokio::test]
    async fn test_current_copy_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.csv"), BODY).unwrap();
        let stub = Arc::new(StubTransport::with_files([("https://example.test/data.csv", BODY)]));
        let outcome = fetcher(stub.clone()).fetch(&task(dir.path(), "data.csv")).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!((stub.opened(), stub.downloaded()), (1, 0));
    }

    #[tokio::test]
    async fn test_force_download() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.csv"), BODY).unwrap();
        let stub = Arc::new(StubTransport::with_files([("https://example.test/data.csv", BODY)]));
        let options = FetchOptions { force_download: true, ..FetchOptions::default() };
        let fetcher = Fetcher::new(options).with_transport("https", stub.clone());
        assert!(fetcher.fetch(&task(dir.path(), "data.csv")).await.unwrap().is_some());
        assert_eq!(stub.downloaded(), 1);
    }

    #[tokio::test]
    async fn test_failures_become_no_update() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubTransport::default());
        assert!(fetcher(stub).fetch_or_warn(task(dir.path(), "missing.csv")).await.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = task(dir.path(), "data.csv");
        task.base_url = "gopher://example.test".to_string();
        let err = Fetcher::new(FetchOptions::default()).fetch(&task).await.unwrap_err();
        assert_eq!(*err, ErrorKind::UnsupportedScheme("gopher".to_string()));
    }

    #[tokio::test]
    async fn test_credentials_and_params_are_sent() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubTransport::with_files([("https://example.test/data.csv?query=item", BODY)]));
        let details = CredsDetails {
            cookie: Some(Cookie { name: "session".into(), value: "abc".into() }),
            auth: None,
            auth_token: Some(AuthToken { header: "X-Token".into(), token: "secret".into() }),
        };
        let fetcher = fetcher(stub.clone()).with_credentials(Credentials::from(&details));
        let mut task = task(dir.path(), "data.csv");
        task.url_params = serde_json::json!({"query": "item"}).as_object().cloned();
        assert!(fetcher.fetch(&task).await.unwrap().is_some());
        let requests = stub.requests();
        assert_eq!(requests[0].credentials.headers.len(), 2);
    }

    /// Writes the first half of `BODY`, then drops the connection.
    struct BrokenTransport;
    struct BrokenTransfer;

    #[async_trait]
    impl Transport for BrokenTransport {
        fn name(&self) -> &str {
            "broken"
        }

        async fn open(&self, _request: &Request) -> Result<Box<dyn Transfer>> {
            Ok(Box::new(BrokenTransfer))
        }
    }

    #[async_trait]
    impl Transfer for BrokenTransfer {
        fn remote_size(&self) -> Option<u64> {
            None
        }

        async fn write_to(self: Box<Self>, target: &Path, _block_size: usize) -> Result<u64> {
            let mut file = create_target(target).await?;
            file.write_all(&BODY[..4]).await.or_raise(|| ErrorKind::Io)?;
            file.flush().await.or_raise(|| ErrorKind::Io)?;
            exn::bail!(ErrorKind::Network)
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> =
            std::fs::read_dir(dir).unwrap().map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned()).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_interrupted_transfer_keeps_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.csv"), b"old,copy\n").unwrap();
        let options = FetchOptions { force_download: true, ..FetchOptions::default() };
        let fetcher = Fetcher::new(options).with_transport("https", Arc::new(BrokenTransport));

        let err = fetcher.fetch(&task(dir.path(), "data.csv")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Network);
        assert_eq!(std::fs::read(dir.path().join("data.csv")).unwrap(), b"old,copy\n");
        assert_eq!(entries(dir.path()), ["data.csv"]);
    }

    #[tokio::test]
    async fn test_interrupted_transfer_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let broken = Fetcher::new(FetchOptions::default()).with_transport("https", Arc::new(BrokenTransport));
        assert!(broken.fetch_or_warn(task(dir.path(), "data.csv")).await.is_none());
        assert!(entries(dir.path()).is_empty());

        // Without a remote size, a partial file with a fresh mtime would
        // otherwise count as current.
        let stub = Arc::new(StubTransport::with_files([("https://example.test/data.csv", BODY)]).without_sizes());
        let outcome = fetcher(stub.clone()).fetch(&task(dir.path(), "data.csv")).await.unwrap().unwrap();
        assert_eq!(outcome.size, BODY.len() as u64);
        assert_eq!(stub.downloaded(), 1);
        assert_eq!(std::fs::read(dir.path().join("data.csv")).unwrap(), BODY);
    }

    fn blake3_hex(data: &[u8]) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference");
        std::fs::write(&path, data).unwrap();
        file_hash(path).unwrap()
    }
}
