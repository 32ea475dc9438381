//! Source specifications and destinations
//!
//! A [`SourceSpec`] is built by the CLI layer from already-validated input.
//! [`SourceSpec::validate`] is the pipeline's fail-fast check: it never
//! touches the network and never creates anything on disk.

use crate::archive::{detect_format, ArchiveFormat};
use crate::error::{AcquireError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Schemes accepted for archive downloads
pub const DOWNLOAD_SCHEMES: &[&str] = &["http", "https", "ftp"];

/// Hosts whose http(s) URLs are accepted as repositories without a `.git` suffix
const KNOWN_FORGES: &[&str] = &["github.com", "gitlab.com", "bitbucket.org", "codeberg.org"];

/// Where a project comes from
#[derive(Debug, Clone)]
pub enum SourceSpec {
    RemoteArchive {
        url: String,
        options: DownloadOptions,
    },
    LocalArchive {
        path: PathBuf,
    },
    GitRepository(GitSource),
}

impl SourceSpec {
    pub fn remote_archive(url: impl Into<String>) -> Self {
        Self::RemoteArchive {
            url: url.into(),
            options: DownloadOptions::default(),
        }
    }

    pub fn local_archive(path: impl Into<PathBuf>) -> Self {
        Self::LocalArchive { path: path.into() }
    }

    pub fn git(source: GitSource) -> Self {
        Self::GitRepository(source)
    }

    pub fn is_git(&self) -> bool {
        matches!(self, Self::GitRepository(_))
    }

    /// Reject malformed specifications before any I/O happens
    pub fn validate(&self) -> Result<()> {
        match self {
            SourceSpec::RemoteArchive { url, .. } => {
                let parsed = parse_download_url(url)?;
                let name = archive_file_name(&parsed)?;
                require_known_format(&name)
            }
            SourceSpec::LocalArchive { path } => {
                if path.as_os_str().is_empty() {
                    return Err(AcquireError::InvalidSource(
                        "archive path is empty".to_string(),
                    ));
                }
                require_known_format(&path.to_string_lossy())
            }
            SourceSpec::GitRepository(git) => git.validate(),
        }
    }
}

fn require_known_format(name: &str) -> Result<()> {
    if detect_format(name) == ArchiveFormat::Unknown {
        return Err(AcquireError::InvalidSource(format!(
            "unsupported archive format: {} (expected one of {})",
            name,
            ArchiveFormat::supported_extensions().join(", ")
        )));
    }
    Ok(())
}

/// Basic-auth credentials for an archive download
#[derive(Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Request options for a remote archive
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub auth: Option<BasicAuth>,
    pub headers: Vec<(String, String)>,
}

/// Revision to check out; at most one can be selected by construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GitRef {
    #[default]
    DefaultBranch,
    Branch(String),
    Tag(String),
    Commit(String),
}

impl GitRef {
    /// Build from independent optional flags, rejecting more than one
    pub fn from_parts(
        branch: Option<String>,
        tag: Option<String>,
        commit: Option<String>,
    ) -> Result<Self> {
        match (branch, tag, commit) {
            (None, None, None) => Ok(GitRef::DefaultBranch),
            (Some(b), None, None) => Ok(GitRef::Branch(b)),
            (None, Some(t), None) => Ok(GitRef::Tag(t)),
            (None, None, Some(c)) => Ok(GitRef::Commit(c)),
            _ => Err(AcquireError::InvalidSource(
                "only one of branch, tag or commit may be given".to_string(),
            )),
        }
    }
}

/// Credentials for a repository clone
#[derive(Clone)]
pub enum GitAuth {
    Credentials { username: String, password: String },
    SshKey { path: PathBuf },
}

impl fmt::Debug for GitAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitAuth::Credentials { username, .. } => f
                .debug_struct("Credentials")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            GitAuth::SshKey { path } => f.debug_struct("SshKey").field("path", path).finish(),
        }
    }
}

/// A repository to clone
#[derive(Debug, Clone)]
pub struct GitSource {
    pub url: String,
    pub shallow: bool,
    pub reference: GitRef,
    pub auth: Option<GitAuth>,
}

impl GitSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shallow: false,
            reference: GitRef::DefaultBranch,
            auth: None,
        }
    }

    pub fn shallow(mut self, shallow: bool) -> Self {
        self.shallow = shallow;
        self
    }

    pub fn reference(mut self, reference: GitRef) -> Self {
        self.reference = reference;
        self
    }

    pub fn auth(mut self, auth: GitAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    fn validate(&self) -> Result<()> {
        if !is_valid_git_url(&self.url) {
            return Err(AcquireError::InvalidSource(format!(
                "not a recognized git repository URL: {}",
                redact_url(&self.url)
            )));
        }

        let empty_ref = match &self.reference {
            GitRef::DefaultBranch => false,
            GitRef::Branch(s) | GitRef::Tag(s) | GitRef::Commit(s) => s.trim().is_empty(),
        };
        if empty_ref {
            return Err(AcquireError::InvalidSource(
                "branch, tag or commit must not be empty".to_string(),
            ));
        }

        match &self.auth {
            Some(GitAuth::SshKey { path }) if !path.is_file() => {
                Err(AcquireError::InvalidSource(format!(
                    "SSH key not found: {}",
                    path.display()
                )))
            }
            Some(GitAuth::Credentials { .. }) if !is_http_url(&self.url) => {
                Err(AcquireError::InvalidSource(
                    "username/password authentication requires an http(s) repository URL"
                        .to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Target project directory; must not exist when a run starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    final_path: PathBuf,
}

impl Destination {
    pub fn new(final_path: impl Into<PathBuf>) -> Self {
        Self {
            final_path: final_path.into(),
        }
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Directory name of the destination, used for project name adaptation
    pub fn project_name(&self) -> Option<String> {
        self.final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    pub fn exists(&self) -> bool {
        // symlink_metadata so a dangling symlink still counts as occupied
        std::fs::symlink_metadata(&self.final_path).is_ok()
    }

    /// Fail fast when the destination is occupied or cannot be created
    pub fn check_available(&self) -> Result<()> {
        if self.final_path.as_os_str().is_empty() {
            return Err(AcquireError::InvalidSource(
                "destination path is empty".to_string(),
            ));
        }
        if self.exists() {
            return Err(AcquireError::AlreadyExists(
                self.final_path.display().to_string(),
            ));
        }
        if let Some(parent) = self.final_path.parent() {
            if parent != Path::new("") && !parent.is_dir() {
                return Err(AcquireError::InvalidSource(format!(
                    "destination parent directory does not exist: {}",
                    parent.display()
                )));
            }
        }
        Ok(())
    }
}

/// Parse an archive URL and check its scheme
pub fn parse_download_url(url: &str) -> Result<Url> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(AcquireError::InvalidSource("archive URL is empty".to_string()));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|e| AcquireError::InvalidSource(format!("invalid archive URL {}: {}", trimmed, e)))?;
    if !DOWNLOAD_SCHEMES.contains(&parsed.scheme()) {
        return Err(AcquireError::InvalidSource(format!(
            "unsupported URL scheme '{}' (expected http, https or ftp)",
            parsed.scheme()
        )));
    }
    Ok(parsed)
}

/// File name of the resource a URL points at (its last non-empty path segment)
pub fn archive_file_name(url: &Url) -> Result<String> {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            AcquireError::InvalidSource(format!("URL has no file name: {}", redact_url(url.as_str())))
        })
}

/// Whether a string looks like a git repository URL
pub fn is_valid_git_url(url: &str) -> bool {
    let url = url.trim();
    if url.is_empty() || url.contains(char::is_whitespace) {
        return false;
    }

    match Url::parse(url) {
        Ok(parsed) => match parsed.scheme() {
            "git" | "ssh" | "git+ssh" => {
                parsed.host_str().is_some() && !parsed.path().trim_matches('/').is_empty()
            }
            "file" => parsed.path().len() > 1,
            "http" | "https" => {
                let Some(host) = parsed.host_str() else {
                    return false;
                };
                let path = parsed.path().trim_end_matches('/');
                if path.ends_with(".git") {
                    return true;
                }
                let segments = path.split('/').filter(|s| !s.is_empty()).count();
                KNOWN_FORGES.contains(&host) && segments >= 2
            }
            _ => false,
        },
        Err(_) => is_scp_like(url),
    }
}

/// `user@host:path` form used by ssh remotes
fn is_scp_like(url: &str) -> bool {
    let Some((user_host, path)) = url.split_once(':') else {
        return false;
    };
    let Some((user, host)) = user_host.split_once('@') else {
        return false;
    };
    !user.is_empty()
        && !host.is_empty()
        && !host.contains('/')
        && !path.is_empty()
        && !path.starts_with("//")
}

fn is_http_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Strip credentials from a URL before it is logged or shown
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
            let _ = parsed.set_username("***");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}
