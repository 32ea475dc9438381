//! Acquisition pipeline
//!
//! Drives one run from `Idle` through
//! `ValidatingSource → Acquiring → Verifying → Staged → RootLocated →
//! StructureValidated → Relocated → PostProcessed → Done`, with `Failed`
//! reachable from every stage and `CleaningUp` always last.
//!
//! Everything is written under a private [`StagingArea`]; the destination is
//! touched exactly once, by the final rename. A failed run therefore never
//! leaves a destination behind, and the staging area is removed on every exit
//! path (errors, cancellation, panics, a dropped future).

use crate::adapt::{adapt_project_name, NameAdaptation};
use crate::archive::{detect_format, ArchiveCodec};
use crate::config::{AcquireConfig, PostProcessOptions};
use crate::error::{AcquireError, Result};
use crate::locator::{has_entries, locate_project_root};
use crate::progress::{Monitor, ProgressSink};
use crate::source::{archive_file_name, parse_download_url, redact_url, Destination, SourceSpec};
use crate::staging::StagingArea;
use crate::tools::ToolTable;
use crate::transport::{HttpTransport, Transport};
use crate::vcs::{self, GitCli, VersionControlClient};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// Staging subdirectory receiving downloaded archives
const DOWNLOAD_DIR: &str = "download";
/// Staging subdirectory receiving the extracted or cloned tree
const TREE_DIR: &str = "tree";

/// Pipeline states reported through [`ProgressSink::on_stage`]
///
/// `Idle` is the state before a run starts; the pipeline never reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stage {
    #[default]
    Idle,
    ValidatingSource,
    Acquiring,
    Verifying,
    Staged,
    RootLocated,
    StructureValidated,
    Relocated,
    PostProcessed,
    Done,
    Failed,
    CleaningUp,
}

impl Stage {
    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::Idle => "Starting",
            Stage::ValidatingSource => "Validating source",
            Stage::Acquiring => "Acquiring",
            Stage::Verifying => "Verifying archive",
            Stage::Staged => "Staged",
            Stage::RootLocated => "Locating project root",
            Stage::StructureValidated => "Validating structure",
            Stage::Relocated => "Moving into place",
            Stage::PostProcessed => "Post-processing",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
            Stage::CleaningUp => "Cleaning up",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// One acquisition: where from, where to, and what to do afterwards
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub source: SourceSpec,
    pub destination: Destination,
    pub post: PostProcessOptions,
}

impl AcquireRequest {
    pub fn new(source: SourceSpec, destination: Destination) -> Self {
        Self {
            source,
            destination,
            post: PostProcessOptions::default(),
        }
    }

    pub fn with_post_process(mut self, post: PostProcessOptions) -> Self {
        self.post = post;
        self
    }
}

/// Non-fatal findings attached to a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Nothing in the tree looked like C/C++; the raw tree was used as is
    NonCppProject { path: PathBuf },
    /// A post-processing step failed after the project was in place
    PostProcess { step: &'static str, detail: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::NonCppProject { path } => write!(
                f,
                "{} does not look like a C/C++ project; using its contents as is",
                path.display()
            ),
            Warning::PostProcess { step, detail } => write!(f, "{} failed: {}", step, detail),
        }
    }
}

/// A finished project
#[derive(Debug, Clone)]
pub struct Materialized {
    /// Final project directory (the destination path)
    pub project_root: PathBuf,
    /// Files extracted or checked out
    pub units: u64,
    pub name_adaptation: Option<NameAdaptation>,
    pub warnings: Vec<Warning>,
}

/// Collaborator invoked once the project is in place
///
/// Typically writes or overwrites template-specific files. Errors are
/// downgraded to warnings.
#[async_trait]
pub trait PopulateHook: Send + Sync {
    async fn populate(&self, project: &Materialized, request: &AcquireRequest)
        -> anyhow::Result<()>;
}

/// Composes decoding, transport and version control into one atomic run
pub struct AcquisitionPipeline {
    codec: ArchiveCodec,
    transport: Arc<dyn Transport>,
    vcs: Option<Arc<dyn VersionControlClient>>,
    hook: Option<Arc<dyn PopulateHook>>,
    config: AcquireConfig,
}

impl AcquisitionPipeline {
    /// Build the host-program backed pipeline from a probed tool table
    pub fn from_tools(tools: &ToolTable, config: AcquireConfig) -> Result<Self> {
        let codec = ArchiveCodec::from_tools(tools, config.poll_interval);
        let transport = Arc::new(HttpTransport::from_tools(tools, &config)?);
        let vcs = GitCli::from_tools(tools).map(|git| Arc::new(git) as Arc<dyn VersionControlClient>);
        Ok(Self::with_components(codec, transport, vcs, config))
    }

    pub fn with_components(
        codec: ArchiveCodec,
        transport: Arc<dyn Transport>,
        vcs: Option<Arc<dyn VersionControlClient>>,
        config: AcquireConfig,
    ) -> Self {
        Self {
            codec,
            transport,
            vcs,
            hook: None,
            config,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn PopulateHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn config(&self) -> &AcquireConfig {
        &self.config
    }

    /// Materialize `request.source` at `request.destination`
    ///
    /// On `Ok` the destination exists and holds the project. On `Err` the
    /// destination does not exist and the staging area has been removed.
    pub async fn run(
        &self,
        request: &AcquireRequest,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Materialized> {
        let monitor = Monitor::new(sink, cancel);

        monitor.stage(Stage::ValidatingSource);
        if let Err(e) = self.validate(request) {
            // Nothing was created, so there is nothing to clean up
            debug!(kind = %e.kind(), error = %e, "source rejected");
            monitor.stage(Stage::Failed);
            return Err(e);
        }

        let mut staging =
            match StagingArea::create(&self.config.staging_parent, &self.config.staging_prefix) {
                Ok(staging) => staging,
                Err(e) => {
                    monitor.stage(Stage::Failed);
                    return Err(AcquireError::RelocationFailed(format!(
                        "failed to create staging area in {}: {}",
                        self.config.staging_parent.display(),
                        e
                    )));
                }
            };

        let outcome = match self.materialize(request, &staging, &monitor).await {
            Ok(materialized) => {
                monitor.stage(Stage::Done);
                Ok(materialized)
            }
            Err(e) => {
                warn!(kind = %e.kind(), error = %e, "acquisition failed");
                monitor.stage(Stage::Failed);
                Err(e)
            }
        };

        monitor.stage(Stage::CleaningUp);
        if let Err(e) = staging.teardown() {
            warn!(path = %staging.root().display(), error = %e, "failed to remove staging area");
        }

        outcome
    }

    /// Fail-fast checks; never touches the network or the filesystem beyond stat
    fn validate(&self, request: &AcquireRequest) -> Result<()> {
        request.destination.check_available()?;
        request.source.validate()?;

        match &request.source {
            SourceSpec::RemoteArchive { url, .. } => {
                let url = parse_download_url(url)?;
                if !self.transport.supports_scheme(url.scheme()) {
                    return Err(AcquireError::ToolUnavailable(format!(
                        "{} downloads need curl on PATH",
                        url.scheme()
                    )));
                }
                self.require_decoder(&archive_file_name(&url)?)
            }
            SourceSpec::LocalArchive { path } => {
                if !path.is_file() {
                    return Err(AcquireError::InvalidSource(format!(
                        "archive not found: {}",
                        path.display()
                    )));
                }
                self.require_decoder(&path.to_string_lossy())
            }
            SourceSpec::GitRepository(_) => match self.vcs {
                Some(_) => Ok(()),
                None => Err(AcquireError::ToolUnavailable(
                    "git is required to clone repositories".to_string(),
                )),
            },
        }
    }

    fn require_decoder(&self, name: &str) -> Result<()> {
        let format = detect_format(name);
        if self.codec.can_decode(format) {
            Ok(())
        } else {
            Err(AcquireError::ToolUnavailable(format!(
                "no decoder installed for {} archives",
                format
            )))
        }
    }

    async fn materialize(
        &self,
        request: &AcquireRequest,
        staging: &StagingArea,
        monitor: &Monitor<'_>,
    ) -> Result<Materialized> {
        monitor.checkpoint("acquisition")?;
        monitor.stage(Stage::Acquiring);

        let tree = staging.child(TREE_DIR);
        let units = match &request.source {
            SourceSpec::RemoteArchive { url, options } => {
                let url = parse_download_url(url)?;
                let shown = redact_url(url.as_str());
                if !self.transport.is_accessible(&url, options).await {
                    return Err(AcquireError::NetworkFailure(format!(
                        "{} is not accessible",
                        shown
                    )));
                }
                if let Some(size) = self.transport.remote_size(&url, options).await {
                    debug!(url = %shown, bytes = size, "remote archive size");
                }

                let download_dir = staging.child(DOWNLOAD_DIR);
                tokio::fs::create_dir_all(&download_dir).await.map_err(|e| {
                    AcquireError::NetworkFailure(format!(
                        "failed to prepare {}: {}",
                        download_dir.display(),
                        e
                    ))
                })?;
                let archive = download_dir.join(archive_file_name(&url)?);

                self.transport
                    .download(&url, options, &archive, monitor)
                    .await?;
                self.unpack(&archive, &tree, monitor).await?
            }
            SourceSpec::LocalArchive { path } => self.unpack(path, &tree, monitor).await?,
            SourceSpec::GitRepository(git) => {
                let vcs = self.vcs.as_ref().ok_or_else(|| {
                    AcquireError::ToolUnavailable("git is required to clone repositories".to_string())
                })?;
                let cloned = match &git.auth {
                    Some(auth) => vcs.clone_with_auth(git, auth, &tree, monitor).await?,
                    None => vcs.clone_repository(git, &tree, monitor).await?,
                };
                monitor.stage(Stage::Staged);
                cloned.units
            }
        };

        monitor.checkpoint("root location")?;
        let mut located = locate_project_root(&tree).map_err(|e| {
            AcquireError::EmptyProject(format!("cannot read staged tree {}: {}", tree.display(), e))
        })?;
        // History lives in the clone root's `.git`; a subdirectory would lose it
        if request.source.is_git() && request.post.preserve_history && located.path != tree {
            info!(
                located = %located.path.display(),
                "keeping the clone root to preserve repository history"
            );
            located.path = tree.clone();
        }
        monitor.stage(Stage::RootLocated);

        let destination = request.destination.final_path();
        let mut warnings = Vec::new();
        if !located.looks_like_cpp {
            warn!(path = %destination.display(), "no C/C++ project indicators found");
            warnings.push(Warning::NonCppProject {
                path: destination.to_path_buf(),
            });
        }
        debug!(root = %located.path.display(), "located project root");

        if !has_entries(&located.path).unwrap_or(false) {
            return Err(AcquireError::EmptyProject(format!(
                "nothing to materialize from {}",
                source_label(&request.source)
            )));
        }
        monitor.stage(Stage::StructureValidated);

        monitor.checkpoint("relocation")?;
        relocate(&located.path, &request.destination).await?;
        monitor.stage(Stage::Relocated);
        info!(path = %destination.display(), "project materialized");

        let mut materialized = Materialized {
            project_root: destination.to_path_buf(),
            units,
            name_adaptation: None,
            warnings,
        };
        self.post_process(request, &mut materialized).await;
        monitor.stage(Stage::PostProcessed);
        Ok(materialized)
    }

    /// Verify then extract an archive into `tree`; returns the file count
    async fn unpack(&self, archive: &Path, tree: &Path, monitor: &Monitor<'_>) -> Result<u64> {
        monitor.checkpoint("verification")?;
        monitor.stage(Stage::Verifying);
        if !self.codec.validate(archive).await {
            return Err(AcquireError::CorruptArchive(format!(
                "{} failed its integrity check",
                archive.display()
            )));
        }

        let extracted = self.codec.extract(archive, tree, monitor).await?;
        monitor.stage(Stage::Staged);
        Ok(extracted.units)
    }

    /// Best-effort steps on the relocated project; failures become warnings
    async fn post_process(&self, request: &AcquireRequest, materialized: &mut Materialized) {
        let root = materialized.project_root.clone();
        let post = &request.post;

        if !post.preserve_history {
            let stripped = match &self.vcs {
                Some(vcs) => vcs.strip_metadata(&root).await,
                None => vcs::remove_metadata(&root).await,
            };
            if let Err(e) = stripped {
                push_warning(&mut materialized.warnings, "remove repository metadata", e);
            }
        }

        if post.adapt_project_name {
            if let Some(name) = request.destination.project_name() {
                match adapt_project_name(&root, &name) {
                    Ok(outcome) => materialized.name_adaptation = Some(outcome),
                    Err(e) => push_warning(&mut materialized.warnings, "adapt project name", e),
                }
            }
        }

        if post.init_repository {
            if post.preserve_history {
                debug!("keeping cloned history; skipping repository initialisation");
            } else if let Err(e) = self.reinitialize(&root, post).await {
                push_warning(&mut materialized.warnings, "initialise repository", e);
            }
        }

        if let Some(hook) = &self.hook {
            if let Err(e) = hook.populate(materialized, request).await {
                push_warning(&mut materialized.warnings, "populate project files", e);
            }
        }
    }

    async fn reinitialize(&self, root: &Path, post: &PostProcessOptions) -> anyhow::Result<()> {
        let Some(vcs) = &self.vcs else {
            anyhow::bail!("git is not available");
        };
        vcs.init_repository(root).await?;
        if post.user_name.is_some() || post.user_email.is_some() {
            vcs.configure_identity(root, post.user_name.as_deref(), post.user_email.as_deref())
                .await?;
        }
        if let Some(remote) = &post.remote_url {
            vcs.add_remote(root, "origin", remote).await?;
        }
        Ok(())
    }
}

/// Move the located root into place with a single rename
async fn relocate(root: &Path, destination: &Destination) -> Result<()> {
    let target = destination.final_path();
    // rename(2) silently replaces an empty directory
    if destination.exists() {
        return Err(AcquireError::AlreadyExists(target.display().to_string()));
    }
    tokio::fs::rename(root, target).await.map_err(|e| {
        AcquireError::RelocationFailed(format!(
            "failed to move project into {}: {}",
            target.display(),
            e
        ))
    })
}

fn push_warning(warnings: &mut Vec<Warning>, step: &'static str, error: impl fmt::Display) {
    warn!(step, error = %error, "post-processing step failed");
    warnings.push(Warning::PostProcess {
        step,
        detail: error.to_string(),
    });
}

fn source_label(source: &SourceSpec) -> String {
    match source {
        SourceSpec::RemoteArchive { url, .. } => redact_url(url),
        SourceSpec::LocalArchive { path } => path.display().to_string(),
        SourceSpec::GitRepository(git) => redact_url(&git.url),
    }
}
