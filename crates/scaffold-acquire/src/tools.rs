//! Host tool capability table
//!
//! Archive decoders, the ftp fallback and git are external programs. They are
//! looked up once when the table is built and handed to components as
//! resolved paths, so availability failures are deterministic and easy to fake.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Host programs this crate knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Tar,
    Unzip,
    SevenZip,
    Git,
    Curl,
}

impl Tool {
    pub const ALL: [Tool; 5] = [Tool::Tar, Tool::Unzip, Tool::SevenZip, Tool::Git, Tool::Curl];

    pub fn display_name(&self) -> &'static str {
        match self {
            Tool::Tar => "tar",
            Tool::Unzip => "unzip",
            Tool::SevenZip => "7-Zip",
            Tool::Git => "git",
            Tool::Curl => "curl",
        }
    }

    /// Binary names to search for, in order of preference
    pub fn binary_names(&self) -> &'static [&'static str] {
        match self {
            Tool::Tar => &["tar"],
            Tool::Unzip => &["unzip"],
            Tool::SevenZip => &["7z", "7za", "7zz"],
            Tool::Git => &["git"],
            Tool::Curl => &["curl"],
        }
    }

    fn version_args(&self) -> &'static [&'static str] {
        match self {
            Tool::Unzip => &["-v"],
            // 7-Zip prints its banner on any invocation
            Tool::SevenZip => &["i"],
            Tool::Tar | Tool::Git | Tool::Curl => &["--version"],
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Tool detection result
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub tool: Tool,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
    pub available: bool,
}

/// Resolved host tool paths
#[derive(Debug, Clone, Default)]
pub struct ToolTable {
    paths: HashMap<Tool, PathBuf>,
}

impl ToolTable {
    /// Table with nothing available
    pub fn empty() -> Self {
        Self::default()
    }

    /// Search `PATH` for every known tool
    pub fn probe() -> Self {
        let mut table = Self::empty();
        for tool in Tool::ALL {
            if let Some(path) = tool
                .binary_names()
                .iter()
                .find_map(|name| which::which(name).ok())
            {
                tracing::debug!(%tool, path = %path.display(), "found host tool");
                table.paths.insert(tool, path);
            }
        }
        table
    }

    /// Record a tool at an explicit path
    pub fn with(mut self, tool: Tool, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(tool, path.into());
        self
    }

    pub fn path(&self, tool: Tool) -> Option<&Path> {
        self.paths.get(&tool).map(PathBuf::as_path)
    }

    pub fn is_available(&self, tool: Tool) -> bool {
        self.paths.contains_key(&tool)
    }

    /// Get the installed tool version (first line of its banner)
    pub fn version(&self, tool: Tool) -> Option<String> {
        let path = self.path(tool)?;
        Command::new(path)
            .args(tool.version_args())
            .output()
            .ok()
            .and_then(|output| {
                if output.status.success() {
                    String::from_utf8(output.stdout).ok().and_then(|s| {
                        s.lines()
                            .map(str::trim)
                            .find(|l| !l.is_empty())
                            .map(str::to_string)
                    })
                } else {
                    None
                }
            })
    }

    /// Availability and version of every known tool
    pub fn report(&self) -> Vec<ToolInfo> {
        Tool::ALL
            .iter()
            .map(|&tool| ToolInfo {
                tool,
                path: self.path(tool).map(Path::to_path_buf),
                version: self.version(tool),
                available: self.is_available(tool),
            })
            .collect()
    }
}
