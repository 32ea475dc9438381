//! ftp downloads through the host `curl`

use crate::error::{AcquireError, Result};
use crate::progress::{Monitor, TransferResult};
use crate::source::{redact_url, DownloadOptions};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

/// What a header probe learned about a remote resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteHead {
    pub size: Option<u64>,
}

/// Runs `curl` as a child process and polls the partial file for progress
#[derive(Debug, Clone)]
pub struct CurlFetcher {
    binary: PathBuf,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl CurlFetcher {
    pub fn new(binary: PathBuf, connect_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            binary,
            connect_timeout,
            poll_interval,
        }
    }

    fn base_args(&self, options: &DownloadOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--fail".into(),
            "--silent".into(),
            "--show-error".into(),
            "--location".into(),
            "--connect-timeout".into(),
            self.connect_timeout.as_secs().max(1).to_string().into(),
        ];
        if let Some(auth) = &options.auth {
            args.push("--user".into());
            args.push(format!("{}:{}", auth.username, auth.password).into());
        }
        for (name, value) in &options.headers {
            args.push("--header".into());
            args.push(format!("{}: {}", name, value).into());
        }
        args
    }

    /// Header-only request; `None` when the resource is not reachable
    pub async fn head(&self, url: &Url, options: &DownloadOptions) -> Option<RemoteHead> {
        let mut args = self.base_args(options);
        args.push("--head".into());
        args.push(url.as_str().into());

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            debug!(url = %redact_url(url.as_str()), "curl header probe failed");
            return None;
        }
        Some(RemoteHead {
            size: parse_content_length(&String::from_utf8_lossy(&output.stdout)),
        })
    }

    pub async fn download(
        &self,
        url: &Url,
        options: &DownloadOptions,
        dest: &Path,
        monitor: &Monitor<'_>,
    ) -> Result<TransferResult> {
        let shown = redact_url(url.as_str());
        let total = self.head(url, options).await.and_then(|head| head.size);

        let mut args = self.base_args(options);
        args.push("--output".into());
        args.push(dest.into());
        args.push(url.as_str().into());

        debug!(url = %shown, ?total, dest = %dest.display(), "downloading with curl");
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                AcquireError::ToolUnavailable(format!(
                    "failed to run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        let finished = child.wait_with_output();
        tokio::pin!(finished);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;

        // The child is never killed: once cancellation is requested the
        // monitor stops ticking and the result is discarded below
        let output = loop {
            tokio::select! {
                output = &mut finished => break output,
                _ = ticker.tick(), if !monitor.should_stop() => {
                    monitor.tick(file_size(dest).await, total);
                }
            }
        }
        .map_err(|e| AcquireError::NetworkFailure(format!("curl did not complete: {}", e)))?;

        monitor.checkpoint("download")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AcquireError::NetworkFailure(format!(
                "failed to download {}: {}",
                shown,
                stderr.trim()
            )));
        }

        let downloaded = file_size(dest).await;
        if !monitor.tick(downloaded, total.or(Some(downloaded))) {
            return Err(AcquireError::Cancelled(format!("download of {} cancelled", shown)));
        }
        info!(url = %shown, bytes = downloaded, "download complete");
        Ok(TransferResult::new(downloaded))
    }
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Last `Content-Length` in a header dump (redirects print several blocks)
fn parse_content_length(headers: &str) -> Option<u64> {
    headers
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .last()
}
