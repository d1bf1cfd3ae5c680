//! S3-compatible transport.
//!
//! Handles `s3://bucket/key` URLs against AWS S3 or any S3-compatible
//! service (Backblaze B2, MinIO, ...). Object keys arrive percent-encoded
//! (see [`escape_s3_url`](crate::location::escape_s3_url)) and are decoded
//! before being handed to the SDK.

use super::{Request, Transfer, Transport, create_target};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region, retry::RetryConfig};
use aws_sdk_s3::operation::get_object::GetObjectOutput;
use exn::{OptionExt, ResultExt};
use ferry_config::S3Settings;
use percent_encoding::percent_decode_str;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};

#[derive(Debug, Clone)]
pub struct S3Transport {
    client: Client,
}

impl S3Transport {
    /// Build a client from explicit settings.
    ///
    /// Without a key pair the SDK's anonymous access is used, which works
    /// for public buckets only.
    pub fn new(settings: &S3Settings) -> Result<Self> {
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        match (&settings.key_id, &settings.key_secret) {
            (Some(key_id), Some(key_secret)) => {
                let credentials = Credentials::new(key_id, key_secret, None, None, "ferry-config");
                config_builder = config_builder.credentials_provider(credentials);
            },
            (None, None) => {},
            _ => exn::bail!(ErrorKind::Configuration("s3.key_id and s3.key_secret must be set together".to_string())),
        }
        if let Some(endpoint_url) = &settings.endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self { client: Client::from_conf(config_builder.build()) })
    }

    /// Split an `s3://bucket/key` URL into its bucket and decoded key.
    fn locate(request: &Request) -> Result<(String, String)> {
        let url = &request.url;
        let bucket = url.host_str().ok_or_raise(|| ErrorKind::InvalidUrl(url.to_string()))?;
        let key = percent_decode_str(url.path().trim_start_matches('/'))
            .decode_utf8()
            .or_raise(|| ErrorKind::InvalidUrl(url.to_string()))?;
        if key.is_empty() {
            exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
        }
        Ok((bucket.to_string(), key.into_owned()))
    }
}

#[async_trait]
impl Transport for S3Transport {
    fn name(&self) -> &str {
        "s3"
    }

    async fn open(&self, request: &Request) -> Result<Box<dyn Transfer>> {
        let (bucket, key) = Self::locate(request)?;
        let output = match self.client.get_object().bucket(&bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) => {
                let missing = err.as_service_error().is_some_and(|e| e.is_no_such_key());
                return Err(err).or_raise(|| match missing {
                    true => ErrorKind::NotFound(request.url.to_string()),
                    false => ErrorKind::Network,
                });
            },
        };
        Ok(Box::new(S3Transfer { output }))
    }
}

struct S3Transfer {
    output: GetObjectOutput,
}

#[async_trait]
impl Transfer for S3Transfer {
    fn remote_size(&self) -> Option<u64> {
        self.output.content_length().and_then(|length| u64::try_from(length).ok())
    }

    async fn write_to(self: Box<Self>, target: &Path, block_size: usize) -> Result<u64> {
        let mut body = self.output.body;
        let mut writer = BufWriter::with_capacity(block_size.max(1), create_target(target).await?);
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.or_raise(|| ErrorKind::Network)?;
            writer.write_all(&chunk).await.or_raise(|| ErrorKind::Io)?;
            written += chunk.len() as u64;
        }
        writer.flush().await.or_raise(|| ErrorKind::Io)?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("s3://bucket/dir/file.csv", "bucket", "dir/file.csv")]
    #[case("s3://some-bucket/badly%23formed-file", "some-bucket", "badly#formed-file")]
    #[case("s3://some-bucket/badly%26formed-file", "some-bucket", "badly&formed-file")]
    fn test_locate(#[case] url: &str, #[case] bucket: &str, #[case] key: &str) {
        let request = Request::new(url.parse().unwrap());
        assert_eq!(S3Transport::locate(&request).unwrap(), (bucket.to_string(), key.to_string()));
    }

    #[test]
    fn test_locate_requires_key() {
        let request = Request::new("s3://bucket/".parse().unwrap());
        assert!(S3Transport::locate(&request).is_err());
    }

    #[test]
    fn test_rejects_half_key_pair() {
        let settings = S3Settings {
            region: "us-east-1".to_string(),
            endpoint: None,
            key_id: Some("id".to_string()),
            key_secret: None,
        };
        let err = S3Transport::new(&settings).unwrap_err();
        assert!(matches!(*err, ErrorKind::Configuration(_)));
    }
}
