//! HTTP(S) transport backed by `reqwest`.

use super::{Request, Transfer, Transport, create_target};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use ferry_config::HttpSettings;
use reqwest::{Client, Response, StatusCode};
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};

#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(settings.timeout())
            .connect_timeout(settings.connect_timeout())
            .build()
            .or_raise(|| ErrorKind::Configuration("failed to build HTTP client".to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn open(&self, request: &Request) -> Result<Box<dyn Transfer>> {
        let mut builder = self.client.get(request.url.clone());
        for (name, value) in &request.credentials.headers {
            builder = builder.header(name, value);
        }
        if let Some((username, password)) = &request.credentials.basic_auth {
            builder = builder.basic_auth(username, password.as_ref());
        }
        let response = builder.send().await.or_raise(|| ErrorKind::Network)?;
        let status = response.status();
        match status {
            s if s.is_success() => Ok(Box::new(HttpTransfer { response })),
            StatusCode::NOT_FOUND | StatusCode::GONE => exn::bail!(ErrorKind::NotFound(request.url.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                exn::bail!(ErrorKind::PermissionDenied(request.url.to_string()))
            },
            other => exn::bail!(ErrorKind::Status(other.as_u16())),
        }
    }
}

struct HttpTransfer {
    response: Response,
}

#[async_trait]
impl Transfer for HttpTransfer {
    fn remote_size(&self) -> Option<u64> {
        self.response.content_length()
    }

    async fn write_to(mut self: Box<Self>, target: &Path, block_size: usize) -> Result<u64> {
        let file = create_target(target).await?;
        let mut writer = BufWriter::with_capacity(block_size.max(1), file);
        let mut written = 0u64;
        while let Some(chunk) = self.response.chunk().await.or_raise(|| ErrorKind::Network)? {
            writer.write_all(&chunk).await.or_raise(|| ErrorKind::Io)?;
            written += chunk.len() as u64;
        }
        writer.flush().await.or_raise(|| ErrorKind::Io)?;
        Ok(written)
    }
}
