//! Scoped staging directories
//!
//! A [`StagingArea`] owns one uniquely named temporary directory for the
//! duration of a pipeline run. It is removed by [`StagingArea::teardown`] or,
//! failing that, when the value is dropped, so every exit path (errors,
//! cancellation, panics, a dropped future) releases it.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

pub struct StagingArea {
    dir: Option<TempDir>,
    root: PathBuf,
}

impl StagingArea {
    /// Create `<parent>/<prefix><random>`
    ///
    /// The random suffix is generated with retries on collision, so concurrent
    /// runs never share a root.
    pub fn create(parent: &Path, prefix: &str) -> io::Result<Self> {
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?;
        let root = dir.path().to_path_buf();
        debug!(path = %root.display(), "created staging area");
        Ok(Self {
            dir: Some(dir),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a named child of the staging root (not created)
    pub fn child(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Recursively remove the staging directory
    ///
    /// Idempotent: calling it again after a teardown is a no-op.
    pub fn teardown(&mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                debug!(path = %self.root.display(), "removing staging area");
                dir.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(path = %self.root.display(), error = %e, "failed to remove staging area");
        }
    }
}

impl std::fmt::Debug for StagingArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingArea")
            .field("root", &self.root)
            .field("released", &self.is_released())
            .finish()
    }
}
