//! Scaffold Acquire - atomic project materialization from archives and git repositories
//!
//! This library turns a source specification (a remote or local archive, or a
//! git repository) into a finished project directory. The destination either
//! ends up fully populated or does not exist at all.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! - **Layer 1: Leaf components** - archive decoding, transport, version control,
//!   staging directories and project root location. Each external program sits
//!   behind a narrow trait so it can be faked in tests.
//! - **Layer 2: Orchestration** - [`AcquisitionPipeline`] drives the stages and
//!   guarantees staging cleanup on every exit path.
//!
//! # Example Usage
//!
//! ```ignore
//! use scaffold_acquire::{AcquireConfig, AcquireRequest, AcquisitionPipeline, Destination, Silent, SourceSpec, ToolTable};
//! use tokio_util::sync::CancellationToken;
//!
//! let tools = ToolTable::probe();
//! let pipeline = AcquisitionPipeline::from_tools(&tools, AcquireConfig::from_env());
//! let request = AcquireRequest::new(
//!     SourceSpec::remote_archive("https://example.com/template.tar.gz"),
//!     Destination::new("./my-app"),
//! );
//! let done = pipeline.run(&request, &Silent, &CancellationToken::new()).await?;
//! println!("project at {}", done.project_root.display());
//! ```

pub mod adapt;
pub mod archive;
pub mod config;
pub mod error;
pub mod locator;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod staging;
pub mod tools;
pub mod transport;
pub mod vcs;

// Re-export main types for convenience
pub use adapt::NameAdaptation;
pub use archive::{detect_format, ArchiveCodec, ArchiveDecoder, ArchiveFormat};
pub use config::{AcquireConfig, PostProcessOptions};
pub use error::{AcquireError, ErrorKind, Result};
pub use locator::{locate_project_root, LocatedRoot};
pub use pipeline::{
    AcquireRequest, AcquisitionPipeline, Materialized, PopulateHook, Stage, Warning,
};
pub use progress::{Monitor, ProgressSink, Silent, TransferResult};
pub use source::{
    BasicAuth, Destination, DownloadOptions, GitAuth, GitRef, GitSource, SourceSpec,
};
pub use staging::StagingArea;
pub use tools::{Tool, ToolTable};
pub use transport::{HttpTransport, Transport};
pub use vcs::{GitCli, VersionControlClient};
