//! Path-safety checks for archive extraction
//!
//! External decoders do not promise to keep entries inside the target
//! directory, so listed entry names are checked lexically before anything is
//! extracted, and symlinks are checked after extraction.

use crate::error::{AcquireError, Result};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Resolve an archive entry name against `dest`, rejecting anything that escapes it
pub fn check_entry(dest: &Path, entry: &str) -> Result<PathBuf> {
    // Entries written on Windows may use backslashes
    let unified = entry.replace('\\', "/");
    let relative = normalize_relative(Path::new(&unified))
        .ok_or_else(|| AcquireError::PathTraversal(entry.to_string()))?;
    Ok(dest.join(relative))
}

/// Lexically normalize a relative path; `None` if it is absolute or climbs above its base
fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(normalized)
}

/// Check every symlink produced under `dest` resolves inside `dest`
pub fn verify_tree(dest: &Path) -> Result<()> {
    for entry in WalkDir::new(dest).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| {
            AcquireError::CorruptArchive(format!("failed to inspect extracted files: {}", e))
        })?;
        if !entry.path_is_symlink() {
            continue;
        }

        let target = std::fs::read_link(entry.path()).map_err(|e| {
            AcquireError::CorruptArchive(format!(
                "failed to read symlink {}: {}",
                entry.path().display(),
                e
            ))
        })?;
        let escape = || {
            AcquireError::PathTraversal(format!(
                "symlink {} -> {}",
                entry.path().display(),
                target.display()
            ))
        };
        if target.is_absolute() {
            return Err(escape());
        }

        let link_dir = entry
            .path()
            .parent()
            .and_then(|p| p.strip_prefix(dest).ok())
            .unwrap_or_else(|| Path::new(""));
        if normalize_relative(&link_dir.join(&target)).is_none() {
            return Err(escape());
        }
    }
    Ok(())
}
