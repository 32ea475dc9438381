//! Remote resource transfer
//!
//! [`Transport`] is the seam the pipeline downloads through. [`HttpTransport`]
//! serves `http`/`https` in process and hands `ftp` to the host `curl`.

mod curl;
mod http;

pub use self::curl::{CurlFetcher, RemoteHead};
pub use self::http::HttpTransport;

use crate::error::Result;
use crate::progress::{Monitor, TransferResult};
use crate::source::DownloadOptions;
use async_trait::async_trait;
use std::path::Path;
use url::Url;

/// Downloads a remote resource to a local file
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stream `url` into `dest`, reporting bytes through the monitor.
    ///
    /// The scheme is checked before any I/O. On cancellation the partial file
    /// is left in place for the caller to discard.
    async fn download(
        &self,
        url: &Url,
        options: &DownloadOptions,
        dest: &Path,
        monitor: &Monitor<'_>,
    ) -> Result<TransferResult>;

    /// Lightweight existence probe; never transfers the body
    async fn is_accessible(&self, url: &Url, options: &DownloadOptions) -> bool;

    /// Best-effort size of the resource
    async fn remote_size(&self, url: &Url, options: &DownloadOptions) -> Option<u64>;

    /// Whether this transport can fetch URLs with `scheme` on this host
    fn supports_scheme(&self, _scheme: &str) -> bool {
        true
    }
}
