//! Anonymous FTP transport.
//!
//! `suppaftp`'s client is blocking, so every session runs on the blocking
//! thread pool. The remote size comes from `SIZE`; the body is retrieved in
//! binary mode with `RETR`.

use super::{Request, Transfer, Transport, copy_blocks, create_target_blocking};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tokio::task::spawn_blocking;

const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

#[derive(Clone, Debug, Default)]
pub struct FtpTransport;

#[async_trait]
impl Transport for FtpTransport {
    fn name(&self) -> &str {
        "ftp"
    }

    async fn open(&self, request: &Request) -> Result<Box<dyn Transfer>> {
        let url = &request.url;
        let host = url.host_str().ok_or_raise(|| ErrorKind::InvalidUrl(url.to_string()))?.to_string();
        let port = url.port_or_known_default().unwrap_or(21);
        let remote_path = percent_decode_str(url.path())
            .decode_utf8()
            .or_raise(|| ErrorKind::InvalidUrl(url.to_string()))?
            .into_owned();
        let transfer = spawn_blocking(move || -> Result<FtpTransfer> {
            let mut stream = FtpStream::connect((host.as_str(), port)).or_raise(|| ErrorKind::Network)?;
            stream.login(ANONYMOUS_USER, ANONYMOUS_PASSWORD).or_raise(|| ErrorKind::Network)?;
            stream.transfer_type(FileType::Binary).or_raise(|| ErrorKind::Network)?;
            // Not every server implements SIZE.
            let size = match stream.size(&remote_path) {
                Ok(size) => Some(size as u64),
                Err(err) => {
                    tracing::debug!(path = %remote_path, error = %err, "remote size unavailable");
                    None
                },
            };
            Ok(FtpTransfer { stream, remote_path, size })
        })
        .await
        .or_raise(|| ErrorKind::Network)??;
        Ok(Box::new(transfer))
    }
}

struct FtpTransfer {
    stream: FtpStream,
    remote_path: String,
    size: Option<u64>,
}

#[async_trait]
impl Transfer for FtpTransfer {
    fn remote_size(&self) -> Option<u64> {
        self.size
    }

    async fn write_to(self: Box<Self>, target: &Path, block_size: usize) -> Result<u64> {
        let target: PathBuf = target.to_path_buf();
        let FtpTransfer { mut stream, remote_path, .. } = *self;
        spawn_blocking(move || -> Result<u64> {
            let mut file = create_target_blocking(&target)?;
            let written = stream
                .retr(&remote_path, |reader| {
                    copy_blocks(reader, &mut file, block_size).map_err(FtpError::ConnectionError)
                })
                .or_raise(|| ErrorKind::Network)?;
            if let Err(err) = stream.quit() {
                tracing::debug!(error = %err, "FTP session did not close cleanly");
            }
            Ok(written)
        })
        .await
        .or_raise(|| ErrorKind::Io)?
    }
}
