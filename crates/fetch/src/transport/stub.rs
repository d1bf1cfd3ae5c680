//! In-memory transport for testing.

use super::{Request, Transfer, Transport, create_target};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;

/// Serves fixed bytes per URL.
///
/// Lookups use the full request URL, query string included. Unknown URLs
/// fail with [`NotFound`](ErrorKind::NotFound), which the fetcher downgrades
/// to "no update".
///
/// # Examples
///
/// ```
/// use ferry_fetch::transport::{Request, StubTransport, Transport};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let stub = StubTransport::with_files([("https://example.test/data.csv", b"a,b\n1,2\n")]);
/// let request = Request::new("https://example.test/data.csv".parse().unwrap());
/// let transfer = stub.open(&request).await.unwrap();
/// assert_eq!(transfer.remote_size(), Some(8));
/// # }
/// ```
pub struct StubTransport {
    files: Mutex<HashMap<String, Vec<u8>>>,
    report_size: bool,
    opened: AtomicUsize,
    downloaded: Arc<AtomicUsize>,
    requests: Mutex<Vec<Request>>,
}

impl StubTransport {
    /// Create a stub pre-populated with `(url, body)` pairs.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<String>, impl AsRef<[u8]>)>) -> Self {
        let files = files.into_iter().map(|(url, body)| (url.into(), body.as_ref().to_vec())).collect();
        Self { files: Mutex::new(files), ..Self::default() }
    }

    /// Stop reporting remote sizes, as servers without `Content-Length` do.
    pub fn without_sizes(mut self) -> Self {
        self.report_size = false;
        self
    }

    /// Replace (or add) the body served for `url`.
    pub fn set_file(&self, url: impl Into<String>, body: impl AsRef<[u8]>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(url.into(), body.as_ref().to_vec());
        }
    }

    /// Number of [`open`](Transport::open) calls so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of bodies actually written to disk so far.
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }
}

impl Default for StubTransport {
    fn default() -> Self {
        Self {
            files: Mutex::default(),
            report_size: true,
            opened: AtomicUsize::new(0),
            downloaded: Arc::default(),
            requests: Mutex::default(),
        }
    }
}

#[async_trait]
impl Transport for StubTransport {
    fn name(&self) -> &str {
        "stub"
    }

    async fn open(&self, request: &Request) -> Result<Box<dyn Transfer>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let body = self.files.lock().ok().and_then(|files| files.get(request.url.as_str()).cloned());
        let Some(body) = body else {
            exn::bail!(ErrorKind::NotFound(request.url.to_string()));
        };
        Ok(Box::new(StubTransfer { body, report_size: self.report_size, downloaded: Arc::clone(&self.downloaded) }))
    }
}

struct StubTransfer {
    body: Vec<u8>,
    report_size: bool,
    downloaded: Arc<AtomicUsize>,
}

#[async_trait]
impl Transfer for StubTransfer {
    fn remote_size(&self) -> Option<u64> {
        self.report_size.then_some(self.body.len() as u64)
    }

    async fn write_to(self: Box<Self>, target: &Path, block_size: usize) -> Result<u64> {
        let mut file = create_target(target).await?;
        for block in self.body.chunks(block_size.max(1)) {
            file.write_all(block).await.or_raise(|| ErrorKind::Io)?;
        }
        file.flush().await.or_raise(|| ErrorKind::Io)?;
        self.downloaded.fetch_add(1, Ordering::SeqCst);
        Ok(self.body.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://example.test/data.csv";

    #[tokio::test]
    async fn test_serves_body() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubTransport::with_files([(URL, b"a,b\n1,2\n")]);
        let transfer = stub.open(&Request::new(URL.parse().unwrap())).await.unwrap();
        assert_eq!(transfer.remote_size(), Some(8));
        let target = dir.path().join("data.csv");
        assert_eq!(transfer.write_to(&target, 3).await.unwrap(), 8);
        assert_eq!(std::fs::read(&target).unwrap(), b"a,b\n1,2\n");
        assert_eq!((stub.opened(), stub.downloaded()), (1, 1));
    }

    #[tokio::test]
    async fn test_unknown_url() {
        let stub = StubTransport::default();
        let err = stub.open(&Request::new(URL.parse().unwrap())).await.err().unwrap();
        assert!(matches!(*err, ErrorKind::NotFound(_)));
        assert_eq!(stub.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_without_sizes() {
        let stub = StubTransport::with_files([(URL, b"x")]).without_sizes();
        let transfer = stub.open(&Request::new(URL.parse().unwrap())).await.unwrap();
        assert_eq!(transfer.remote_size(), None);
    }
}
