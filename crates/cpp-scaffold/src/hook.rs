//! Files written into every new project

use anyhow::{Context, Result};
use async_trait::async_trait;
use scaffold_acquire::{AcquireRequest, Materialized, PopulateHook};

const GITIGNORE: &str = "\
# Build trees
build/
cmake-build-*/
out/

# CMake
CMakeCache.txt
CMakeFiles/
CMakeUserPresets.json
compile_commands.json

# Objects and binaries
*.o
*.obj
*.a
*.lib
*.so
*.dylib
*.dll
*.exe

# Editors
.vscode/
.idea/
.cache/
";

/// Writes a C/C++ `.gitignore` when the project does not ship one
pub struct GitignoreHook;

#[async_trait]
impl PopulateHook for GitignoreHook {
    async fn populate(&self, project: &Materialized, _request: &AcquireRequest) -> Result<()> {
        let path = project.project_root.join(".gitignore");
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), "keeping existing .gitignore");
            return Ok(());
        }
        tokio::fs::write(&path, GITIGNORE)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}
