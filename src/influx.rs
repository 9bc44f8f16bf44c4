use crate::point::{encode_batch, Point};
use crate::sink::{PointWriter, WriterError};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

/// Connection settings for [`InfluxWriter`].
///
/// The writer talks to the InfluxDB v2 HTTP API and posts line protocol
/// to `/api/v2/write` with nanosecond precision.
#[derive(Clone, Debug)]
pub struct InfluxConfig {
    /// Base URL without path, e.g. "http://127.0.0.1:8086"
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// Per-request timeout, bounds how long one write may hang.
    pub request_timeout: Duration,
}

impl InfluxConfig {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            org: org.into(),
            bucket: bucket.into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// InfluxDB v2 implementation of [`PointWriter`].
#[derive(Clone)]
pub struct InfluxWriter {
    client: Client,
    base_url: String,
    write_url: String,
    auth_header: String,
}

impl InfluxWriter {
    /// Build a writer bound to the configured org/bucket pair.
    ///
    /// **Returns**
    /// - `Err(WriterError::InvalidUrl)` if `url` is not an absolute http(s) URL.
    /// - `Err(WriterError::Http)` if the HTTP client cannot be constructed.
    ///
    /// No request is made here; see [`InfluxWriter::health`].
    pub fn new(config: &InfluxConfig) -> Result<Self, WriterError> {
        let base_url = config.url.trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url).map_err(|e| WriterError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(WriterError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let client = Client::builder().timeout(config.request_timeout).build()?;

        let write_url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            base_url,
            urlencoding::encode(&config.org),
            urlencoding::encode(&config.bucket)
        );

        Ok(Self {
            client,
            base_url,
            write_url,
            auth_header: format!("Token {}", config.token),
        })
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }

    /// Check that the server is reachable and reports itself healthy.
    pub async fn health(&self) -> Result<(), WriterError> {
        let url = format!("{}/health", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(WriterError::Status { status, body });
        }
        Ok(())
    }
}

#[async_trait]
impl PointWriter for InfluxWriter {
    async fn write_batch(&self, points: &[Point]) -> Result<(), WriterError> {
        if points.is_empty() {
            return Ok(());
        }

        let body = encode_batch(points);
        debug!(points = points.len(), bytes = body.len(), "writing batch");

        let resp = self
            .client
            .post(&self.write_url)
            .header("Authorization", self.auth_header.as_str())
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(WriterError::Status { status, body })
        }
    }
}
