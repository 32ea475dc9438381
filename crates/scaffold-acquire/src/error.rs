//! Error taxonomy for project acquisition
//!
//! Every failure carries exactly one kind plus a human-readable detail. None of
//! them are retried by this crate.

use std::fmt;
use thiserror::Error;

/// Result type alias for acquisition operations
pub type Result<T> = std::result::Result<T, AcquireError>;

/// Terminal failure of an acquisition run
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The source specification or destination is malformed
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// The destination directory already exists
    #[error("destination already exists: {0}")]
    AlreadyExists(String),

    /// A required host program is not installed
    #[error("required tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Transfer failed (DNS, connection, non-2xx response, I/O while streaming)
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The archive failed its integrity check or could not be decoded
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// An archive entry resolves outside of the extraction directory
    #[error("archive entry escapes extraction directory: {0}")]
    PathTraversal(String),

    /// Repository clone failed, including rejected credentials
    #[error("clone failed: {0}")]
    CloneFailure(String),

    /// The located project root has no entries
    #[error("project is empty: {0}")]
    EmptyProject(String),

    /// Moving the project into its destination failed
    #[error("relocation failed: {0}")]
    RelocationFailed(String),

    /// The progress sink or the cancellation token asked to stop
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Fieldless discriminant of [`AcquireError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidSource,
    AlreadyExists,
    ToolUnavailable,
    NetworkFailure,
    CorruptArchive,
    PathTraversal,
    CloneFailure,
    EmptyProject,
    RelocationFailed,
    Cancelled,
}

impl AcquireError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcquireError::InvalidSource(_) => ErrorKind::InvalidSource,
            AcquireError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            AcquireError::ToolUnavailable(_) => ErrorKind::ToolUnavailable,
            AcquireError::NetworkFailure(_) => ErrorKind::NetworkFailure,
            AcquireError::CorruptArchive(_) => ErrorKind::CorruptArchive,
            AcquireError::PathTraversal(_) => ErrorKind::PathTraversal,
            AcquireError::CloneFailure(_) => ErrorKind::CloneFailure,
            AcquireError::EmptyProject(_) => ErrorKind::EmptyProject,
            AcquireError::RelocationFailed(_) => ErrorKind::RelocationFailed,
            AcquireError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Human-readable detail without the kind prefix
    pub fn detail(&self) -> &str {
        match self {
            AcquireError::InvalidSource(d)
            | AcquireError::AlreadyExists(d)
            | AcquireError::ToolUnavailable(d)
            | AcquireError::NetworkFailure(d)
            | AcquireError::CorruptArchive(d)
            | AcquireError::PathTraversal(d)
            | AcquireError::CloneFailure(d)
            | AcquireError::EmptyProject(d)
            | AcquireError::RelocationFailed(d)
            | AcquireError::Cancelled(d) => d,
        }
    }
}

impl ErrorKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ErrorKind::InvalidSource => "InvalidSource",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::ToolUnavailable => "ToolUnavailable",
            ErrorKind::NetworkFailure => "NetworkFailure",
            ErrorKind::CorruptArchive => "CorruptArchive",
            ErrorKind::PathTraversal => "PathTraversal",
            ErrorKind::CloneFailure => "CloneFailure",
            ErrorKind::EmptyProject => "EmptyProject",
            ErrorKind::RelocationFailed => "RelocationFailed",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
