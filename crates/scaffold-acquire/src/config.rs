//! Pipeline configuration
//!
//! [`AcquireConfig`] is resolved once per process (defaults plus environment
//! overrides). [`PostProcessOptions`] travel with each request.

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding where staging directories are created
pub const STAGING_DIR_ENV: &str = "CPP_SCAFFOLD_STAGING_DIR";

/// Environment variable overriding the HTTP connect timeout, in seconds
pub const CONNECT_TIMEOUT_ENV: &str = "CPP_SCAFFOLD_CONNECT_TIMEOUT_SECS";

const DEFAULT_STAGING_PREFIX: &str = "cpp-scaffold-";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Process-wide acquisition settings
#[derive(Debug, Clone)]
pub struct AcquireConfig {
    /// Directory that receives staging areas; must share a filesystem with
    /// the destination for relocation to succeed
    pub staging_parent: PathBuf,
    pub staging_prefix: String,
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// How often in-flight external programs are polled for progress
    pub poll_interval: Duration,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            staging_parent: std::env::temp_dir(),
            staging_prefix: DEFAULT_STAGING_PREFIX.to_string(),
            user_agent: format!("cpp-scaffold/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl AcquireConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup(STAGING_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            config.staging_parent = PathBuf::from(dir);
        }

        if let Some(raw) = lookup(CONNECT_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.connect_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(
                    value = %raw,
                    "ignoring invalid {}",
                    CONNECT_TIMEOUT_ENV
                ),
            }
        }

        config
    }

    pub fn with_staging_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.staging_parent = parent.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Steps applied after the project has been relocated
///
/// All of them are best effort: failures become warnings on the result.
#[derive(Debug, Clone, Default)]
pub struct PostProcessOptions {
    /// Keep the cloned repository's history (`.git`) instead of stripping it
    pub preserve_history: bool,
    /// Run `git init` in the finished project (ignored when history is preserved)
    pub init_repository: bool,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    /// Added as `origin` after re-initialisation
    pub remote_url: Option<String>,
    /// Rewrite the CMake `project()` name to the destination directory name
    pub adapt_project_name: bool,
}
