//! Project name adaptation
//!
//! Templates ship with their own CMake `project()` name. When requested, the
//! first `project(<name> ...)` call of the top-level `CMakeLists.txt` is
//! rewritten to the destination directory name.

use std::io;
use std::ops::Range;
use std::path::Path;
use tracing::debug;

const CMAKE_LISTS: &str = "CMakeLists.txt";

/// What name adaptation did to the project
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameAdaptation {
    Renamed { from: String, to: String },
    /// The project already carries the requested name
    Unchanged,
    /// No top-level CMake project declaration with a literal name
    NotApplicable,
}

/// Rewrite the CMake project name under `root` to `name`
pub fn adapt_project_name(root: &Path, name: &str) -> io::Result<NameAdaptation> {
    let path = root.join(CMAKE_LISTS);
    if !path.is_file() {
        return Ok(NameAdaptation::NotApplicable);
    }

    let target = cmake_identifier(name);
    if target.is_empty() {
        return Ok(NameAdaptation::NotApplicable);
    }

    let content = std::fs::read_to_string(&path)?;
    let Some(span) = find_project_name(&content) else {
        return Ok(NameAdaptation::NotApplicable);
    };

    let current = &content[span.clone()];
    if current.starts_with("${") {
        return Ok(NameAdaptation::NotApplicable);
    }
    if current == target {
        return Ok(NameAdaptation::Unchanged);
    }

    let from = current.to_string();
    let mut updated = String::with_capacity(content.len() + target.len());
    updated.push_str(&content[..span.start]);
    updated.push_str(&target);
    updated.push_str(&content[span.end..]);
    std::fs::write(&path, updated)?;

    debug!(path = %path.display(), %from, to = %target, "renamed cmake project");
    Ok(NameAdaptation::Renamed { from, to: target })
}

/// Map a directory name onto the characters CMake accepts in project names
fn cmake_identifier(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Byte range of the first argument of the first `project(` call
fn find_project_name(content: &str) -> Option<Range<usize>> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let code = line.split('#').next().unwrap_or("");
        if let Some(range) = project_name_in_line(code) {
            return Some(offset + range.start..offset + range.end);
        }
        offset += line.len();
    }
    None
}

fn project_name_in_line(code: &str) -> Option<Range<usize>> {
    let lower = code.to_ascii_lowercase();
    let mut search = 0;
    while let Some(found) = lower[search..].find("project") {
        let start = search + found;
        let after = start + "project".len();
        search = after;

        let boundary = lower[..start]
            .chars()
            .next_back()
            .map(|c| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(true);
        if !boundary {
            continue;
        }

        let rest = &code[after..];
        let Some(open) = rest.trim_start().strip_prefix('(') else {
            continue;
        };
        let arg = open.trim_start();
        let arg_at = code.len() - arg.len();

        if let Some(quoted) = arg.strip_prefix('"') {
            let end = quoted.find('"')?;
            return Some(arg_at + 1..arg_at + 1 + end);
        }
        let end = arg
            .find(|c: char| c.is_whitespace() || c == ')')
            .unwrap_or(arg.len());
        if end == 0 {
            return None;
        }
        return Some(arg_at..arg_at + end);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with(cmake: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CMAKE_LISTS), cmake).unwrap();
        dir
    }

    fn read(dir: &tempfile::TempDir) -> String {
        std::fs::read_to_string(dir.path().join(CMAKE_LISTS)).unwrap()
    }

    #[test]
    fn test_renames_project_declaration() {
        let dir = project_with(
            "cmake_minimum_required(VERSION 3.16)\nproject(template VERSION 1.0 LANGUAGES CXX)\nadd_executable(${PROJECT_NAME} src/main.cpp)\n",
        );

        let outcome = adapt_project_name(dir.path(), "my-app").unwrap();
        assert_eq!(
            outcome,
            NameAdaptation::Renamed {
                from: "template".to_string(),
                to: "my-app".to_string()
            }
        );
        assert!(read(&dir).contains("project(my-app VERSION 1.0 LANGUAGES CXX)"));
        assert!(read(&dir).contains("add_executable(${PROJECT_NAME}"));
    }

    #[test]
    fn test_case_whitespace_and_comments() {
        let dir = project_with("# project(commented)\nPROJECT (  Demo)\n");
        adapt_project_name(dir.path(), "tool").unwrap();
        assert_eq!(read(&dir), "# project(commented)\nPROJECT (  tool)\n");
    }

    #[test]
    fn test_quoted_name() {
        let dir = project_with("project(\"Old Name\" CXX)\n");
        adapt_project_name(dir.path(), "new").unwrap();
        assert_eq!(read(&dir), "project(\"new\" CXX)\n");
    }

    #[test]
    fn test_other_commands_are_not_matched() {
        let dir = project_with("set(myproject_dir x)\nset_project(x)\n");
        assert_eq!(
            adapt_project_name(dir.path(), "app").unwrap(),
            NameAdaptation::NotApplicable
        );
    }

    #[test]
    fn test_unchanged_and_not_applicable() {
        let dir = project_with("project(app)\n");
        assert_eq!(
            adapt_project_name(dir.path(), "app").unwrap(),
            NameAdaptation::Unchanged
        );

        let variable = project_with("project(${NAME})\n");
        assert_eq!(
            adapt_project_name(variable.path(), "app").unwrap(),
            NameAdaptation::NotApplicable
        );

        let empty = tempfile::tempdir().unwrap();
        assert_eq!(
            adapt_project_name(empty.path(), "app").unwrap(),
            NameAdaptation::NotApplicable
        );
    }

    #[test]
    fn test_directory_names_are_sanitized() {
        assert_eq!(cmake_identifier("my app!"), "my_app");
        assert_eq!(cmake_identifier("lib.core-2"), "lib.core-2");
        assert_eq!(cmake_identifier("***"), "");
    }
}
