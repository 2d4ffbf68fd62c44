//! Recipe loading
//!
//! Lowering demands recipes for other projects through the `RecipeLoader`
//! seam, keyed by the reference's project-canonical form. The in-tree
//! implementation serves local projects from disk; remote projects need a
//! git transport, which is an external collaborator.

use crate::domain::{Origin, Reference};
use crate::syntax::{parse, Lexer, Recipe};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

pub const DEFAULT_RECIPE_NAME: &str = "Kilnfile";

#[async_trait]
pub trait RecipeLoader: Send + Sync {
    /// Loads and parses the recipe of the project `reference` points into.
    async fn load(&self, reference: &Reference) -> Result<Recipe>;
}

/// Loads recipes from the local filesystem, rooted at the invocation
/// directory.
pub struct FsRecipeLoader {
    root: PathBuf,
    file_name: String,
}

impl FsRecipeLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_name: DEFAULT_RECIPE_NAME.to_string(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    fn project_dir(&self, reference: &Reference) -> Result<PathBuf> {
        match reference.origin() {
            Origin::LocalInternal => Ok(self.root.clone()),
            Origin::LocalExternal { local_path } => {
                if local_path.starts_with('/') {
                    Ok(PathBuf::from(local_path))
                } else {
                    Ok(self.root.join(local_path))
                }
            }
            Origin::Remote { git_url, .. } => Err(anyhow!(
                "remote project {} requires a git transport",
                git_url
            )),
        }
    }
}

#[async_trait]
impl RecipeLoader for FsRecipeLoader {
    async fn load(&self, reference: &Reference) -> Result<Recipe> {
        let path = self.project_dir(reference)?.join(&self.file_name);
        debug!(path = %path.display(), "loading recipe");
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read recipe {}", path.display()))?;
        let display = path.display().to_string();
        let tokens = Lexer::new(&text)
            .tokenize()
            .map_err(|e| anyhow!("{}: {}", display, e))?;
        parse(tokens, &display).map_err(|e| anyhow!("{}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GitLookup;
    use std::fs;

    #[tokio::test]
    async fn loads_and_parses_local_recipe() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Kilnfile"), "build:\n    RUN make\n").unwrap();
        let loader = FsRecipeLoader::new(dir.path());
        let recipe = loader
            .load(&Reference::local_internal("build"))
            .await
            .unwrap();
        assert!(recipe.target("build").is_some());
    }

    #[tokio::test]
    async fn missing_recipe_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FsRecipeLoader::new(dir.path());
        let err = loader
            .load(&Reference::local_internal("build"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read recipe"));
    }

    #[tokio::test]
    async fn remote_project_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FsRecipeLoader::new(dir.path());
        let reference =
            Reference::parse("github.com/acme/widgets+t", &GitLookup::with_defaults()).unwrap();
        let err = loader.load(&reference).await.unwrap_err();
        assert!(err.to_string().contains("git transport"));
    }
}
