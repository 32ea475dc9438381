//! Repository cloning and post-clone git housekeeping
//!
//! [`VersionControlClient`] is the seam; [`GitCli`] drives the host `git`.
//! Anonymous and authenticated clones are separate entry points so supplied
//! credentials are never silently dropped: a rejected credential is a
//! `CloneFailure`, interactive prompts are disabled, and nothing is retried.

use crate::error::{AcquireError, Result};
use crate::progress::{Monitor, TransferResult};
use crate::source::{redact_url, GitAuth, GitRef, GitSource};
use crate::tools::{Tool, ToolTable};
use anyhow::Context;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;
use walkdir::WalkDir;

/// Name of the repository metadata directory
pub const METADATA_DIR: &str = ".git";

/// Number of stderr lines kept for failure details
const ERROR_TAIL: usize = 5;

#[async_trait]
pub trait VersionControlClient: Send + Sync {
    /// Clone without credentials into `dest`, which must not exist
    async fn clone_repository(
        &self,
        source: &GitSource,
        dest: &Path,
        monitor: &Monitor<'_>,
    ) -> Result<TransferResult>;

    /// Clone with explicit credentials; a rejection is a `CloneFailure`
    async fn clone_with_auth(
        &self,
        source: &GitSource,
        auth: &GitAuth,
        dest: &Path,
        monitor: &Monitor<'_>,
    ) -> Result<TransferResult>;

    /// Remove the metadata directory; succeeds when it is already absent
    async fn strip_metadata(&self, dir: &Path) -> anyhow::Result<()>;

    async fn init_repository(&self, dir: &Path) -> anyhow::Result<()>;

    async fn configure_identity(
        &self,
        dir: &Path,
        name: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn add_remote(&self, dir: &Path, name: &str, url: &str) -> anyhow::Result<()>;
}

/// One git invocation of a clone
#[derive(Debug, Clone, PartialEq)]
struct GitStep {
    args: Vec<OsString>,
    /// Run inside the clone directory (`-C`)
    in_dest: bool,
    /// stderr carries `--progress` output
    reports_progress: bool,
}

impl GitStep {
    fn new(args: Vec<OsString>, in_dest: bool, reports_progress: bool) -> Self {
        Self {
            args,
            in_dest,
            reports_progress,
        }
    }
}

/// Host `git` driven as a child process
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
}

impl GitCli {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// `None` when git is not in the tool table
    pub fn from_tools(tools: &ToolTable) -> Option<Self> {
        tools.path(Tool::Git).map(|path| Self::new(path.to_path_buf()))
    }

    fn command(&self, cwd: Option<&Path>) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(dir) = cwd {
            command.arg("-C").arg(dir);
        }
        command.env("GIT_TERMINAL_PROMPT", "0").stdin(Stdio::null());
        command
    }

    async fn clone_into(
        &self,
        source: &GitSource,
        fetch_url: &str,
        ssh_command: Option<String>,
        secret: Option<&str>,
        dest: &Path,
        monitor: &Monitor<'_>,
    ) -> Result<TransferResult> {
        let shown = redact_url(&source.url);
        info!(url = %shown, reference = ?source.reference, shallow = source.shallow, "cloning repository");

        for step in clone_plan(fetch_url, source, dest) {
            monitor.checkpoint("clone")?;
            let cwd = step.in_dest.then_some(dest);
            let mut command = self.command(cwd);
            command.args(&step.args);
            if let Some(ssh) = &ssh_command {
                command.env("GIT_SSH_COMMAND", ssh);
            }
            debug!(tool = "git", step = ?redact_args(&step.args, secret), "running git");
            self.run_step(command, step.reports_progress, secret, monitor)
                .await?;
        }

        // Keep credentials out of the clone's stored remote
        if fetch_url != source.url {
            let mut command = self.command(Some(dest));
            command.args(["remote", "set-url", "origin", source.url.as_str()]);
            self.run_step(command, false, secret, monitor).await?;
        }

        monitor.checkpoint("clone")?;
        let files = count_checked_out(dest);
        monitor.tick(files, Some(files));
        info!(url = %shown, files, "repository cloned");
        Ok(TransferResult::new(files))
    }

    async fn run_step(
        &self,
        mut command: Command,
        reports_progress: bool,
        secret: Option<&str>,
        monitor: &Monitor<'_>,
    ) -> Result<()> {
        let mut child = command
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

        let mut tail: Vec<String> = Vec::new();
        if let Some(stderr) = child.stderr.take() {
            // Progress lines are rewritten in place with `\r`
            let mut segments = BufReader::new(stderr).split(b'\r');
            while let Some(segment) = segments
                .next_segment()
                .await
                .map_err(|e| AcquireError::CloneFailure(format!("failed to read git output: {}", e)))?
            {
                let text = String::from_utf8_lossy(&segment);
                for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
                    match parse_progress(line) {
                        Some((current, total)) if reports_progress => {
                            // Latched after cancellation; git runs to completion
                            monitor.tick(current, Some(total));
                        }
                        Some(_) => {}
                        None => {
                            if tail.len() == ERROR_TAIL {
                                tail.remove(0);
                            }
                            tail.push(line.to_string());
                        }
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AcquireError::CloneFailure(format!("git did not complete: {}", e)))?;

        monitor.checkpoint("clone")?;

        if !status.success() {
            let detail = if tail.is_empty() {
                format!("git exited with {}", status)
            } else {
                tail.join("; ")
            };
            return Err(AcquireError::CloneFailure(scrub(&detail, secret)));
        }
        Ok(())
    }

    async fn run_quiet(&self, dir: &Path, args: &[&str]) -> anyhow::Result<()> {
        let output = self
            .command(Some(dir))
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary.display()))?;
        if !output.status.success() {
            anyhow::bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl VersionControlClient for GitCli {
    async fn clone_repository(
        &self,
        source: &GitSource,
        dest: &Path,
        monitor: &Monitor<'_>,
    ) -> Result<TransferResult> {
        self.clone_into(source, &source.url, None, None, dest, monitor)
            .await
    }

    async fn clone_with_auth(
        &self,
        source: &GitSource,
        auth: &GitAuth,
        dest: &Path,
        monitor: &Monitor<'_>,
    ) -> Result<TransferResult> {
        match auth {
            GitAuth::Credentials { username, password } => {
                let url = with_credentials(&source.url, username, password)?;
                self.clone_into(source, &url, None, Some(password), dest, monitor)
                    .await
            }
            GitAuth::SshKey { path } => {
                if !path.is_file() {
                    return Err(AcquireError::CloneFailure(format!(
                        "SSH key not found: {}",
                        path.display()
                    )));
                }
                self.clone_into(
                    source,
                    &source.url,
                    Some(ssh_command(path)),
                    None,
                    dest,
                    monitor,
                )
                .await
            }
        }
    }

    async fn strip_metadata(&self, dir: &Path) -> anyhow::Result<()> {
        remove_metadata(dir).await
    }

    async fn init_repository(&self, dir: &Path) -> anyhow::Result<()> {
        self.run_quiet(dir, &["init", "--quiet"]).await
    }

    async fn configure_identity(
        &self,
        dir: &Path,
        name: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<()> {
        if let Some(name) = name {
            self.run_quiet(dir, &["config", "user.name", name]).await?;
        }
        if let Some(email) = email {
            self.run_quiet(dir, &["config", "user.email", email]).await?;
        }
        Ok(())
    }

    async fn add_remote(&self, dir: &Path, name: &str, url: &str) -> anyhow::Result<()> {
        self.run_quiet(dir, &["remote", "add", name, url]).await
    }
}

/// Remove `dir/.git`; succeeds when it is already absent
///
/// Needs no git binary, so archive sources can be stripped too.
pub async fn remove_metadata(dir: &Path) -> anyhow::Result<()> {
    let metadata = dir.join(METADATA_DIR);
    let removed = match tokio::fs::symlink_metadata(&metadata).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&metadata).await,
        // Worktrees and submodules use a `.git` file
        Ok(_) => tokio::fs::remove_file(&metadata).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    removed.with_context(|| format!("failed to remove {}", metadata.display()))?;
    debug!(path = %metadata.display(), "removed repository metadata");
    Ok(())
}

/// The git invocations needed to materialize `source` at `dest`
fn clone_plan(url: &str, source: &GitSource, dest: &Path) -> Vec<GitStep> {
    let mut clone: Vec<OsString> = vec!["clone".into(), "--progress".into()];

    match &source.reference {
        GitRef::Commit(sha) if source.shallow => {
            // A bare commit cannot be named in `clone --branch`; fetch it directly
            return vec![
                GitStep::new(vec!["init".into(), "--quiet".into(), dest.into()], false, false),
                GitStep::new(
                    vec!["remote".into(), "add".into(), "origin".into(), url.into()],
                    true,
                    false,
                ),
                GitStep::new(
                    vec![
                        "fetch".into(),
                        "--progress".into(),
                        "--depth".into(),
                        "1".into(),
                        "origin".into(),
                        sha.into(),
                    ],
                    true,
                    true,
                ),
                GitStep::new(
                    vec![
                        "checkout".into(),
                        "--quiet".into(),
                        "--detach".into(),
                        "FETCH_HEAD".into(),
                    ],
                    true,
                    false,
                ),
            ];
        }
        GitRef::Commit(sha) => {
            clone.push("--no-checkout".into());
            clone.push(url.into());
            clone.push(dest.into());
            return vec![
                GitStep::new(clone, false, true),
                GitStep::new(
                    vec![
                        "checkout".into(),
                        "--quiet".into(),
                        "--detach".into(),
                        sha.into(),
                    ],
                    true,
                    false,
                ),
            ];
        }
        GitRef::Branch(name) | GitRef::Tag(name) => {
            clone.push("--branch".into());
            clone.push(name.into());
        }
        GitRef::DefaultBranch => {}
    }

    if source.shallow {
        clone.push("--depth".into());
        clone.push("1".into());
    }
    clone.push(url.into());
    clone.push(dest.into());
    vec![GitStep::new(clone, false, true)]
}

/// `(current, total)` from a `Receiving objects:  45% (450/1000)` line
fn parse_progress(line: &str) -> Option<(u64, u64)> {
    let rest = line
        .strip_prefix("remote: ")
        .unwrap_or(line)
        .strip_prefix("Receiving objects:")?;
    let counts = rest.split_once('(')?.1.split_once(')')?.0;
    let (current, total) = counts.split_once('/')?;
    Some((current.trim().parse().ok()?, total.trim().parse().ok()?))
}

fn with_credentials(url: &str, username: &str, password: &str) -> Result<String> {
    let mut parsed = Url::parse(url).map_err(|e| {
        AcquireError::InvalidSource(format!("invalid repository URL {}: {}", redact_url(url), e))
    })?;
    if parsed.set_username(username).is_err() || parsed.set_password(Some(password)).is_err() {
        return Err(AcquireError::InvalidSource(format!(
            "cannot attach credentials to {}",
            redact_url(url)
        )));
    }
    Ok(parsed.to_string())
}

/// `GIT_SSH_COMMAND` restricted to one key and no prompts
fn ssh_command(key: &Path) -> String {
    let quoted = key.to_string_lossy().replace('\'', r"'\''");
    format!(
        "ssh -i '{}' -o IdentitiesOnly=yes -o BatchMode=yes",
        quoted
    )
}

fn scrub(text: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() => text.replace(secret, "***"),
        _ => text.to_string(),
    }
}

fn redact_args(args: &[OsString], secret: Option<&str>) -> Vec<String> {
    args.iter()
        .map(|arg| scrub(&redact_url(&arg.to_string_lossy()), secret))
        .collect()
}

fn count_checked_out(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != METADATA_DIR)
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .count() as u64
}
