//! Project root location inside an extracted or cloned tree
//!
//! Archives usually wrap the project in a single top-level directory
//! (`template/`), repositories usually do not. A chain of wrapper directories
//! (a directory whose only entry is another directory) is unwrapped first.
//! The result is the project root if it has a build marker or a C/C++ source
//! anywhere below it; otherwise the first child directory (by name) passing
//! the same test is used. When nothing qualifies the staged root is used
//! anyway and the result is flagged; the heuristic never blocks a run.

use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Build-system files that mark a project root
pub const BUILD_MARKERS: &[&str] = &[
    "CMakeLists.txt",
    "Makefile",
    "meson.build",
    "BUILD",
    "WORKSPACE",
];

/// C and C++ source/header extensions
pub const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "h", "hh", "hpp", "hxx"];

/// Version-control metadata is never scanned for sources
const SKIPPED_DIRS: &[&str] = &[".git"];

/// Result of root location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedRoot {
    pub path: PathBuf,
    /// `false` when no candidate looked like a C/C++ project and the staged
    /// root was used as a fallback
    pub looks_like_cpp: bool,
}

/// Find the project root under `staged`
pub fn locate_project_root(staged: &Path) -> io::Result<LocatedRoot> {
    let found = |path: PathBuf| LocatedRoot {
        path,
        looks_like_cpp: true,
    };

    let mut root = staged.to_path_buf();
    while let Some(inner) = single_wrapper(&root)? {
        root = inner;
    }

    if looks_like_cpp_project(&root) {
        return Ok(found(root));
    }

    let mut children: Vec<PathBuf> = std::fs::read_dir(&root)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| !is_skipped(path))
        .collect();
    children.sort();

    if let Some(child) = children.into_iter().find(|c| looks_like_cpp_project(c)) {
        return Ok(found(child));
    }

    Ok(LocatedRoot {
        path: staged.to_path_buf(),
        looks_like_cpp: false,
    })
}

/// A build marker at the top level, or a C/C++ source anywhere below
pub fn looks_like_cpp_project(dir: &Path) -> bool {
    has_build_marker(dir) || has_sources(dir)
}

fn has_build_marker(dir: &Path) -> bool {
    BUILD_MARKERS.iter().any(|marker| dir.join(marker).is_file())
}

fn has_sources(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry.path()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .any(|entry| has_source_extension(entry.path()))
}

/// The only entry of `dir`, if it is a directory
///
/// Repository metadata counts as an entry, so a clone is never unwrapped
/// away from its `.git`.
fn single_wrapper(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?.filter_map(|entry| entry.ok());
    match (entries.next(), entries.next()) {
        (Some(only), None) if only.file_type()?.is_dir() && !is_skipped(&only.path()) => {
            Ok(Some(only.path()))
        }
        _ => Ok(None),
    }
}

/// Whether the directory has at least one entry besides repository metadata
pub fn has_entries(dir: &Path) -> io::Result<bool> {
    Ok(std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .any(|entry| !is_skipped(&entry.path())))
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            SOURCE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn is_skipped(path: &Path) -> bool {
    path.file_name()
        .map(|name| SKIPPED_DIRS.iter().any(|s| name == *s))
        .unwrap_or(false)
}
