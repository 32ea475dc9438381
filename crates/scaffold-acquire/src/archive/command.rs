//! Archive decoders backed by host programs (`tar`, `unzip`, `7z`)

use super::listing::{Listing, ListingStyle};
use super::{ArchiveDecoder, ArchiveFormat};
use crate::error::{AcquireError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Which host program a [`CommandDecoder`] drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderProgram {
    Tar,
    Unzip,
    SevenZip,
}

/// Decoder that shells out to one host program
#[derive(Debug, Clone)]
pub struct CommandDecoder {
    program: DecoderProgram,
    binary: PathBuf,
}

impl CommandDecoder {
    pub fn tar(binary: PathBuf) -> Self {
        Self {
            program: DecoderProgram::Tar,
            binary,
        }
    }

    pub fn unzip(binary: PathBuf) -> Self {
        Self {
            program: DecoderProgram::Unzip,
            binary,
        }
    }

    pub fn seven_zip(binary: PathBuf) -> Self {
        Self {
            program: DecoderProgram::SevenZip,
            binary,
        }
    }

    pub fn program(&self) -> DecoderProgram {
        self.program
    }

    fn tar_mode(format: ArchiveFormat, action: char) -> String {
        let compression = match format {
            ArchiveFormat::TarGz => "z",
            ArchiveFormat::TarBz2 => "j",
            ArchiveFormat::TarXz => "J",
            _ => "",
        };
        format!("-{}{}f", action, compression)
    }

    fn test_args(&self, archive: &Path, format: ArchiveFormat) -> Vec<OsString> {
        match self.program {
            // Reading the whole table of contents is tar's integrity check
            DecoderProgram::Tar => vec![Self::tar_mode(format, 't').into(), archive.into()],
            DecoderProgram::Unzip => vec!["-tq".into(), archive.into()],
            DecoderProgram::SevenZip => vec!["t".into(), archive.into()],
        }
    }

    fn list_args(&self, archive: &Path, format: ArchiveFormat) -> Vec<OsString> {
        match self.program {
            DecoderProgram::Tar => vec![Self::tar_mode(format, 't').into(), archive.into()],
            DecoderProgram::Unzip => vec!["-Z1".into(), archive.into()],
            DecoderProgram::SevenZip => vec!["l".into(), "-slt".into(), archive.into()],
        }
    }

    fn extract_args(&self, archive: &Path, format: ArchiveFormat, dest: &Path) -> Vec<OsString> {
        match self.program {
            DecoderProgram::Tar => vec![
                Self::tar_mode(format, 'x').into(),
                archive.into(),
                "-C".into(),
                dest.into(),
            ],
            DecoderProgram::Unzip => vec![
                "-q".into(),
                "-o".into(),
                archive.into(),
                "-d".into(),
                dest.into(),
            ],
            DecoderProgram::SevenZip => {
                let mut out_flag = OsString::from("-o");
                out_flag.push(dest);
                vec!["x".into(), archive.into(), out_flag, "-y".into()]
            }
        }
    }

    fn listing_style(&self) -> ListingStyle {
        match self.program {
            DecoderProgram::SevenZip => ListingStyle::SevenZipTechnical,
            DecoderProgram::Tar | DecoderProgram::Unzip => ListingStyle::PerLine,
        }
    }

    async fn run(&self, args: Vec<OsString>) -> Result<Output> {
        debug!(tool = self.name(), ?args, "running decoder");
        Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                AcquireError::ToolUnavailable(format!(
                    "failed to run {}: {}",
                    self.binary.display(),
                    e
                ))
            })
    }
}

fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exit code {}", output.status.code().unwrap_or(-1))
    } else {
        stderr.to_string()
    }
}

#[async_trait]
impl ArchiveDecoder for CommandDecoder {
    fn name(&self) -> &'static str {
        match self.program {
            DecoderProgram::Tar => "tar",
            DecoderProgram::Unzip => "unzip",
            DecoderProgram::SevenZip => "7z",
        }
    }

    fn supports(&self, format: ArchiveFormat) -> bool {
        match self.program {
            DecoderProgram::Tar => matches!(
                format,
                ArchiveFormat::Tar
                    | ArchiveFormat::TarGz
                    | ArchiveFormat::TarBz2
                    | ArchiveFormat::TarXz
            ),
            DecoderProgram::Unzip => format == ArchiveFormat::Zip,
            DecoderProgram::SevenZip => {
                matches!(format, ArchiveFormat::SevenZip | ArchiveFormat::Zip)
            }
        }
    }

    async fn test(&self, archive: &Path, format: ArchiveFormat) -> bool {
        match self.run(self.test_args(archive, format)).await {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                debug!(tool = self.name(), detail = %failure_detail(&output), "archive test failed");
                false
            }
            Err(e) => {
                debug!(tool = self.name(), error = %e, "archive test could not run");
                false
            }
        }
    }

    async fn list(&self, archive: &Path, format: ArchiveFormat) -> Result<Listing> {
        let output = self.run(self.list_args(archive, format)).await?;
        if !output.status.success() {
            return Err(AcquireError::CorruptArchive(format!(
                "{} could not list {}: {}",
                self.name(),
                archive.display(),
                failure_detail(&output)
            )));
        }
        Ok(Listing::new(
            String::from_utf8_lossy(&output.stdout).into_owned(),
            self.listing_style(),
        ))
    }

    async fn extract(&self, archive: &Path, format: ArchiveFormat, dest: &Path) -> Result<()> {
        let output = self.run(self.extract_args(archive, format, dest)).await?;
        if !output.status.success() {
            return Err(AcquireError::CorruptArchive(format!(
                "{} could not extract {}: {}",
                self.name(),
                archive.display(),
                failure_detail(&output)
            )));
        }
        Ok(())
    }
}
