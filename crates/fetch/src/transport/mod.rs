//! Protocol transports.
//!
//! A [`Transport`] opens a remote resource and reports its size before any
//! bytes are written, so the caller can decide whether the local copy is
//! current. The returned [`Transfer`] then streams the body to disk.
//!
//! | Scheme            | Transport           |
//! |-------------------|---------------------|
//! | `http`, `https`   | [`HttpTransport`]   |
//! | `ftp`             | [`FtpTransport`]    |
//! | `file`            | [`LocalTransport`]  |
//! | `s3` (feature)    | `S3Transport`       |

mod ftp;
mod http;
mod local;
#[cfg(feature = "s3")]
mod s3;
#[cfg(any(test, feature = "mock"))]
mod stub;

pub use self::ftp::FtpTransport;
pub use self::http::HttpTransport;
pub use self::local::LocalTransport;
#[cfg(feature = "s3")]
pub use self::s3::S3Transport;
#[cfg(any(test, feature = "mock"))]
pub use self::stub::StubTransport;
use crate::credentials::Credentials;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::Path;
use tokio::fs::{self, File};
use url::Url;

/// A single fetch: where from, and how to authenticate.
#[derive(Clone, Debug)]
pub struct Request {
    pub url: Url,
    pub credentials: Credentials,
}

impl Request {
    pub fn new(url: Url) -> Self {
        Self { url, credentials: Credentials::default() }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Opens remote resources for one or more URL schemes.
///
/// # Examples
///
/// ```no_run
/// use ferry_fetch::transport::{HttpTransport, Request, Transport};
/// use std::path::Path;
/// # async fn example(transport: &HttpTransport) -> ferry_fetch::error::Result<()> {
/// let request = Request::new("https://example.test/data.csv".parse().unwrap());
/// let transfer = transport.open(&request).await?;
/// println!("remote size: {:?}", transfer.remote_size());
/// transfer.write_to(Path::new("data/data.csv"), 16 * 1024).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name used in log output.
    fn name(&self) -> &str;

    /// Connect and start retrieving `request.url`.
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) when the resource does not
    /// exist.
    async fn open(&self, request: &Request) -> Result<Box<dyn Transfer>>;
}

/// An opened remote resource whose body has not been consumed yet.
#[async_trait]
pub trait Transfer: Send {
    /// Size reported by the remote, if it reports one.
    fn remote_size(&self) -> Option<u64>;

    /// Stream the body into `target`, replacing it, using writes of at most
    /// `block_size` bytes. Parent directories are created as needed. Returns
    /// the number of bytes written.
    async fn write_to(self: Box<Self>, target: &Path, block_size: usize) -> Result<u64>;
}

/// Create (or truncate) `target`, creating its parent directories.
pub(crate) async fn create_target(target: &Path) -> Result<File> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io)?;
    }
    File::create(target).await.or_raise(|| ErrorKind::Io)
}

/// Blocking counterpart of [`create_target`], for transports that run on a
/// blocking thread.
pub(crate) fn create_target_blocking(target: &Path) -> Result<std::fs::File> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
    }
    std::fs::File::create(target).or_raise(|| ErrorKind::Io)
}

/// Copy `reader` into `writer` in blocks of `block_size` bytes.
pub(crate) fn copy_blocks(
    reader: &mut dyn std::io::Read,
    writer: &mut dyn std::io::Write,
    block_size: usize,
) -> std::io::Result<u64> {
    let mut buffer = vec![0; block_size.max(1)];
    let mut written = 0;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        writer.write_all(&buffer[..read])?;
        written += read as u64;
    }
    writer.flush()?;
    Ok(written)
}
