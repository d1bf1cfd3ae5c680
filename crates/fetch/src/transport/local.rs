//! `file://` transport for sources that live on a mounted filesystem.

use super::{Request, Transfer, Transport, create_target};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};

#[derive(Clone, Debug, Default)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    fn name(&self) -> &str {
        "local"
    }

    async fn open(&self, request: &Request) -> Result<Box<dyn Transfer>> {
        let path =
            request.url.to_file_path().ok().ok_or_raise(|| ErrorKind::InvalidUrl(request.url.to_string()))?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == IoErrorKind::NotFound => {
                exn::bail!(ErrorKind::NotFound(request.url.to_string()))
            },
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        };
        let size = file.metadata().await.or_raise(|| ErrorKind::Io)?.len();
        Ok(Box::new(LocalTransfer { path, file, size }))
    }
}

struct LocalTransfer {
    path: PathBuf,
    file: File,
    size: u64,
}

#[async_trait]
impl Transfer for LocalTransfer {
    fn remote_size(&self) -> Option<u64> {
        Some(self.size)
    }

    async fn write_to(self: Box<Self>, target: &Path, block_size: usize) -> Result<u64> {
        if self.path == target {
            return Ok(self.size);
        }
        let block_size = block_size.max(1);
        let mut reader = BufReader::with_capacity(block_size, self.file);
        let mut writer = BufWriter::with_capacity(block_size, create_target(target).await?);
        let written = tokio::io::copy(&mut reader, &mut writer).await.or_raise(|| ErrorKind::Io)?;
        writer.flush().await.or_raise(|| ErrorKind::Io)?;
        Ok(written)
    }
}
