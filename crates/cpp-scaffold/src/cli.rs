//! Command line flags and their translation into acquisition requests

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use scaffold_acquire::source::parse_download_url;
use scaffold_acquire::{
    AcquireRequest, BasicAuth, Destination, DownloadOptions, GitAuth, GitRef, GitSource,
    PostProcessOptions, SourceSpec,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cpp-scaffold")]
#[command(about = "CLI for creating C/C++ projects from archives and git repositories")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a project from a remote (http, https, ftp) or local archive
    Archive(ArchiveArgs),
    /// Create a project from a git repository
    Git(GitArgs),
    /// Show which host tools (tar, unzip, 7z, git, curl) are available
    Tools,
}

#[derive(Parser, Debug)]
pub struct ArchiveArgs {
    /// Archive URL or path to a local archive
    pub source: String,

    /// Project directory to create (must not exist)
    pub directory: PathBuf,

    /// Username for HTTP basic authentication
    #[arg(long, requires = "password")]
    pub user: Option<String>,

    /// Password for HTTP basic authentication
    #[arg(long, requires = "user")]
    pub password: Option<String>,

    /// Extra request header as NAME:VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    #[command(flatten)]
    pub post: PostArgs,
}

#[derive(Parser, Debug)]
pub struct GitArgs {
    /// Repository URL (https, ssh, git, file or user@host:path)
    pub url: String,

    /// Project directory to create (must not exist)
    pub directory: PathBuf,

    /// Branch to check out
    #[arg(short, long, conflicts_with_all = ["tag", "commit"])]
    pub branch: Option<String>,

    /// Tag to check out
    #[arg(short, long, conflicts_with = "commit")]
    pub tag: Option<String>,

    /// Commit to check out
    #[arg(short, long)]
    pub commit: Option<String>,

    /// Fetch only the selected revision
    #[arg(long)]
    pub shallow: bool,

    /// Username for an https remote
    #[arg(long, requires = "password", conflicts_with = "ssh_key")]
    pub username: Option<String>,

    /// Password or access token for an https remote
    #[arg(long, requires = "username")]
    pub password: Option<String>,

    /// Private key for an ssh remote
    #[arg(long = "ssh-key", value_name = "PATH")]
    pub ssh_key: Option<PathBuf>,

    /// Keep the repository history instead of starting fresh
    #[arg(long = "keep-history")]
    pub keep_history: bool,

    #[command(flatten)]
    pub post: PostArgs,
}

/// Steps applied once the project is in place
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct PostArgs {
    /// Initialise a new git repository in the project
    #[arg(long)]
    pub init: bool,

    /// user.name for the new repository
    #[arg(long = "git-name", requires = "init")]
    pub git_name: Option<String>,

    /// user.email for the new repository
    #[arg(long = "git-email", requires = "init")]
    pub git_email: Option<String>,

    /// Add this URL as `origin` in the new repository
    #[arg(long, requires = "init")]
    pub remote: Option<String>,

    /// Rename the CMake project to the directory name
    #[arg(long)]
    pub rename: bool,

    /// Do not write a .gitignore when the project has none
    #[arg(long = "no-gitignore")]
    pub no_gitignore: bool,
}

impl PostArgs {
    fn options(&self, preserve_history: bool) -> PostProcessOptions {
        PostProcessOptions {
            preserve_history,
            init_repository: self.init,
            user_name: self.git_name.clone(),
            user_email: self.git_email.clone(),
            remote_url: self.remote.clone(),
            adapt_project_name: self.rename,
        }
    }
}

impl ArchiveArgs {
    pub fn request(&self) -> Result<AcquireRequest> {
        let source = if looks_like_url(&self.source) {
            let options = DownloadOptions {
                auth: match (&self.user, &self.password) {
                    (Some(username), Some(password)) => Some(BasicAuth {
                        username: username.clone(),
                        password: password.clone(),
                    }),
                    _ => None,
                },
                headers: self
                    .headers
                    .iter()
                    .map(|h| parse_header(h))
                    .collect::<Result<_>>()?,
            };
            // Reject unsupported schemes here so the message names the flag
            parse_download_url(&self.source)
                .with_context(|| format!("invalid archive source '{}'", self.source))?;
            SourceSpec::RemoteArchive {
                url: self.source.clone(),
                options,
            }
        } else {
            if self.user.is_some() || !self.headers.is_empty() {
                bail!("--user, --password and --header only apply to remote archives");
            }
            SourceSpec::local_archive(&self.source)
        };

        Ok(AcquireRequest::new(source, Destination::new(&self.directory))
            .with_post_process(self.post.options(false)))
    }
}

impl GitArgs {
    pub fn request(&self) -> Result<AcquireRequest> {
        let reference =
            GitRef::from_parts(self.branch.clone(), self.tag.clone(), self.commit.clone())?;
        let mut source = GitSource::new(&self.url)
            .shallow(self.shallow)
            .reference(reference);

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            source = source.auth(GitAuth::Credentials {
                username: username.clone(),
                password: password.clone(),
            });
        } else if let Some(path) = &self.ssh_key {
            source = source.auth(GitAuth::SshKey { path: path.clone() });
        }

        Ok(
            AcquireRequest::new(SourceSpec::git(source), Destination::new(&self.directory))
                .with_post_process(self.post.options(self.keep_history)),
        )
    }
}

/// `scheme://` prefix; anything else is treated as a local path
fn looks_like_url(source: &str) -> bool {
    source
        .split_once("://")
        .map(|(scheme, _)| !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphabetic()))
        .unwrap_or(false)
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("header '{}' must be NAME:VALUE", raw);
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("header '{}' has an empty name", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}
