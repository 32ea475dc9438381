//! Archive format detection, validation, listing and extraction
//!
//! This module provides:
//! - Format detection from the file name's compound extension
//! - The [`ArchiveDecoder`] seam, with one implementation per host program
//! - [`ArchiveCodec`], which dispatches to the first capable decoder and
//!   enforces path safety around extraction

pub mod command;
pub mod listing;
pub mod safety;

use crate::error::{AcquireError, Result};
use crate::progress::{Monitor, TransferResult};
use crate::tools::{Tool, ToolTable};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

pub use command::CommandDecoder;
pub use listing::{ListedEntry, Listing, ListingStyle};

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    TarBz2,
    TarXz,
    SevenZip,
    Tar,
    Unknown,
}

impl ArchiveFormat {
    pub fn display_name(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::TarBz2 => "tar.bz2",
            ArchiveFormat::TarXz => "tar.xz",
            ArchiveFormat::SevenZip => "7z",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Unknown => "unknown",
        }
    }

    pub fn supported_extensions() -> &'static [&'static str] {
        &[".zip", ".tar.gz", ".tar.bz2", ".tar.xz", ".7z", ".tar"]
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Detect the archive format from a file name
pub fn detect_format(name: &str) -> ArchiveFormat {
    let lower = name.to_ascii_lowercase();
    // Compound extensions first so `.tar.gz` never matches `.tar`
    if lower.ends_with(".tar.gz") {
        ArchiveFormat::TarGz
    } else if lower.ends_with(".tar.bz2") {
        ArchiveFormat::TarBz2
    } else if lower.ends_with(".tar.xz") {
        ArchiveFormat::TarXz
    } else if lower.ends_with(".zip") {
        ArchiveFormat::Zip
    } else if lower.ends_with(".7z") {
        ArchiveFormat::SevenZip
    } else if lower.ends_with(".tar") {
        ArchiveFormat::Tar
    } else {
        ArchiveFormat::Unknown
    }
}

fn format_of(archive: &Path) -> ArchiveFormat {
    archive
        .file_name()
        .map(|n| detect_format(&n.to_string_lossy()))
        .unwrap_or(ArchiveFormat::Unknown)
}

/// One host decoder program
///
/// Implementations are never handed [`ArchiveFormat::Unknown`].
#[async_trait]
pub trait ArchiveDecoder: Send + Sync {
    /// Short name for logs and error messages
    fn name(&self) -> &'static str;

    fn supports(&self, format: ArchiveFormat) -> bool;

    /// Integrity check; `false` for any failure including a failed spawn
    async fn test(&self, archive: &Path, format: ArchiveFormat) -> bool;

    async fn list(&self, archive: &Path, format: ArchiveFormat) -> Result<Listing>;

    async fn extract(&self, archive: &Path, format: ArchiveFormat, dest: &Path) -> Result<()>;
}

/// Dispatcher over the available decoders
#[derive(Clone)]
pub struct ArchiveCodec {
    decoders: Vec<Arc<dyn ArchiveDecoder>>,
    poll_interval: Duration,
}

impl ArchiveCodec {
    /// Create a codec with no decoders
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            decoders: Vec::new(),
            poll_interval,
        }
    }

    /// Register a decoder for every archive program present in the tool table
    pub fn from_tools(tools: &ToolTable, poll_interval: Duration) -> Self {
        let mut codec = Self::new(poll_interval);
        if let Some(tar) = tools.path(Tool::Tar) {
            codec = codec.with_decoder(Arc::new(CommandDecoder::tar(tar.to_path_buf())));
        }
        if let Some(unzip) = tools.path(Tool::Unzip) {
            codec = codec.with_decoder(Arc::new(CommandDecoder::unzip(unzip.to_path_buf())));
        }
        if let Some(seven_zip) = tools.path(Tool::SevenZip) {
            codec =
                codec.with_decoder(Arc::new(CommandDecoder::seven_zip(seven_zip.to_path_buf())));
        }
        codec
    }

    /// Add a decoder; earlier decoders win when several support a format
    pub fn with_decoder(mut self, decoder: Arc<dyn ArchiveDecoder>) -> Self {
        self.decoders.push(decoder);
        self
    }

    pub fn decoder_for(&self, format: ArchiveFormat) -> Option<&Arc<dyn ArchiveDecoder>> {
        if format == ArchiveFormat::Unknown {
            return None;
        }
        self.decoders.iter().find(|d| d.supports(format))
    }

    pub fn can_decode(&self, format: ArchiveFormat) -> bool {
        self.decoder_for(format).is_some()
    }

    /// Integrity check; a missing decoder and an invalid archive both yield `false`
    pub async fn validate(&self, archive: &Path) -> bool {
        let format = format_of(archive);
        let Some(decoder) = self.decoder_for(format) else {
            debug!(archive = %archive.display(), %format, "no decoder available");
            return false;
        };
        debug!(archive = %archive.display(), decoder = decoder.name(), "testing archive");
        decoder.test(archive, format).await
    }

    /// List entry names; re-runs the decoder on every call
    pub async fn list_contents(&self, archive: &Path) -> Result<Listing> {
        let (format, decoder) = self.resolve(archive)?;
        decoder.list(archive, format).await
    }

    /// Extract into `dest` after checking every listed entry stays inside it
    ///
    /// Returns the number of files the listing reports. While the decoder
    /// runs, the produced file count is polled and reported; cancellation is
    /// honoured once the decoder has finished.
    pub async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        monitor: &Monitor<'_>,
    ) -> Result<TransferResult> {
        let (format, decoder) = self.resolve(archive)?;

        let listing = decoder.list(archive, format).await?;
        let mut total: u64 = 0;
        for entry in listing.entries() {
            safety::check_entry(dest, entry.name)?;
            if !entry.is_dir {
                total += 1;
            }
        }

        tokio::fs::create_dir_all(dest).await.map_err(|e| {
            AcquireError::CorruptArchive(format!(
                "failed to create extraction directory {}: {}",
                dest.display(),
                e
            ))
        })?;

        monitor.checkpoint("extraction")?;
        monitor.tick(0, Some(total));

        debug!(
            archive = %archive.display(),
            dest = %dest.display(),
            decoder = decoder.name(),
            entries = total,
            "extracting archive"
        );

        let extraction = decoder.extract(archive, format, dest);
        tokio::pin!(extraction);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;

        let outcome = loop {
            tokio::select! {
                result = &mut extraction => break result,
                _ = ticker.tick(), if !monitor.should_stop() => {
                    monitor.tick(count_files(dest), Some(total));
                }
            }
        };
        outcome?;

        monitor.checkpoint("extraction")?;
        safety::verify_tree(dest)?;
        monitor.tick(total, Some(total));

        info!(archive = %archive.display(), files = total, "archive extracted");
        Ok(TransferResult::new(total))
    }

    fn resolve(&self, archive: &Path) -> Result<(ArchiveFormat, &Arc<dyn ArchiveDecoder>)> {
        let format = format_of(archive);
        if format == ArchiveFormat::Unknown {
            return Err(AcquireError::InvalidSource(format!(
                "unsupported archive format: {}",
                archive.display()
            )));
        }
        let decoder = self.decoder_for(format).ok_or_else(|| {
            AcquireError::ToolUnavailable(format!("no decoder installed for {} archives", format))
        })?;
        Ok((format, decoder))
    }
}

/// Number of regular files under `dir`
fn count_files(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .count() as u64
}
