use super::curl::CurlFetcher;
use super::Transport;
use crate::config::AcquireConfig;
use crate::error::{AcquireError, Result};
use crate::progress::{Monitor, TransferResult};
use crate::source::{redact_url, DownloadOptions, DOWNLOAD_SCHEMES};
use crate::tools::{Tool, ToolTable};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Method, RequestBuilder, StatusCode};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

/// In-process HTTP(S) client with an optional `curl` fallback for ftp
pub struct HttpTransport {
    client: reqwest::Client,
    ftp: Option<CurlFetcher>,
}

impl HttpTransport {
    /// Create a transport without ftp support
    pub fn new(config: &AcquireConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                AcquireError::ToolUnavailable(format!("failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client, ftp: None })
    }

    /// Create a transport, enabling ftp when `curl` is in the tool table
    pub fn from_tools(tools: &ToolTable, config: &AcquireConfig) -> Result<Self> {
        let transport = Self::new(config)?;
        Ok(match tools.path(Tool::Curl) {
            Some(curl) => transport.with_ftp(CurlFetcher::new(
                curl.to_path_buf(),
                config.connect_timeout,
                config.poll_interval,
            )),
            None => transport,
        })
    }

    pub fn with_ftp(mut self, fetcher: CurlFetcher) -> Self {
        self.ftp = Some(fetcher);
        self
    }

    fn ftp(&self) -> Result<&CurlFetcher> {
        self.ftp.as_ref().ok_or_else(|| {
            AcquireError::ToolUnavailable("curl is required for ftp downloads".to_string())
        })
    }

    fn request(&self, method: Method, url: &Url, options: &DownloadOptions) -> Result<RequestBuilder> {
        let mut request = self.client.request(method, url.clone());
        if let Some(auth) = &options.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                AcquireError::InvalidSource(format!("invalid header name: {}", name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                AcquireError::InvalidSource(format!("invalid value for header {}", name))
            })?;
            request = request.header(name, value);
        }
        Ok(request)
    }

    /// HEAD, falling back to a one-byte ranged GET for servers that reject HEAD
    async fn probe(&self, url: &Url, options: &DownloadOptions) -> Option<reqwest::Response> {
        let head = self.request(Method::HEAD, url, options).ok()?.send().await.ok()?;
        if head.status() != StatusCode::METHOD_NOT_ALLOWED {
            return Some(head);
        }
        self.request(Method::GET, url, options)
            .ok()?
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .ok()
    }

    async fn download_http(
        &self,
        url: &Url,
        options: &DownloadOptions,
        dest: &Path,
        monitor: &Monitor<'_>,
    ) -> Result<TransferResult> {
        let shown = redact_url(url.as_str());
        let mut response = self
            .request(Method::GET, url, options)?
            .send()
            .await
            .map_err(|e| AcquireError::NetworkFailure(format!("request to {} failed: {}", shown, e)))?;

        if !response.status().is_success() {
            return Err(AcquireError::NetworkFailure(format!(
                "failed to download {}: HTTP {}",
                shown,
                response.status()
            )));
        }

        // Unknown and zero lengths are both reported as unknown
        let total = response.content_length().filter(|&len| len > 0);
        debug!(url = %shown, ?total, dest = %dest.display(), "streaming download");

        let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
            AcquireError::NetworkFailure(format!("failed to create {}: {}", dest.display(), e))
        })?;

        let mut downloaded: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AcquireError::NetworkFailure(format!("error reading {}: {}", shown, e)))?
        {
            file.write_all(&chunk).await.map_err(|e| {
                AcquireError::NetworkFailure(format!("failed to write {}: {}", dest.display(), e))
            })?;
            downloaded += chunk.len() as u64;

            if !monitor.tick(downloaded, total) {
                let _ = file.flush().await;
                return Err(AcquireError::Cancelled(format!(
                    "download of {} cancelled after {} bytes",
                    shown, downloaded
                )));
            }
        }

        file.flush().await.map_err(|e| {
            AcquireError::NetworkFailure(format!("failed to write {}: {}", dest.display(), e))
        })?;

        info!(url = %shown, bytes = downloaded, "download complete");
        Ok(TransferResult::new(downloaded))
    }
}

fn check_scheme(url: &Url) -> Result<()> {
    if DOWNLOAD_SCHEMES.contains(&url.scheme()) {
        Ok(())
    } else {
        Err(AcquireError::InvalidSource(format!(
            "unsupported URL scheme '{}' (expected http, https or ftp)",
            url.scheme()
        )))
    }
}

/// Complete length from a `Content-Range: bytes 0-0/1234` value
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(
        &self,
        url: &Url,
        options: &DownloadOptions,
        dest: &Path,
        monitor: &Monitor<'_>,
    ) -> Result<TransferResult> {
        check_scheme(url)?;
        monitor.checkpoint("download")?;
        if url.scheme() == "ftp" {
            return self.ftp()?.download(url, options, dest, monitor).await;
        }
        self.download_http(url, options, dest, monitor).await
    }

    async fn is_accessible(&self, url: &Url, options: &DownloadOptions) -> bool {
        if check_scheme(url).is_err() {
            return false;
        }
        if url.scheme() == "ftp" {
            return match self.ftp() {
                Ok(ftp) => ftp.head(url, options).await.is_some(),
                Err(_) => false,
            };
        }
        self.probe(url, options)
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }

    async fn remote_size(&self, url: &Url, options: &DownloadOptions) -> Option<u64> {
        check_scheme(url).ok()?;
        if url.scheme() == "ftp" {
            return self.ftp().ok()?.head(url, options).await?.size;
        }
        let response = self.probe(url, options).await?;
        if response.status() == StatusCode::PARTIAL_CONTENT {
            return content_range_total(response.headers().get(CONTENT_RANGE)?.to_str().ok()?);
        }
        if !response.status().is_success() {
            return None;
        }
        // Read the header directly: reqwest reports the body length for HEAD
        response
            .headers()
            .get(CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    fn supports_scheme(&self, scheme: &str) -> bool {
        match scheme {
            "http" | "https" => true,
            "ftp" => self.ftp.is_some(),
            _ => false,
        }
    }
}
