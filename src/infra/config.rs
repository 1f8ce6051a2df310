//! Source repositories configuration (YAML or JSON).
//!
//! Only consulted by the CLI to resolve `--repo` names to paths. The file
//! maps names to paths either at the top level or under a `source:` key:
//!
//! ```yaml
//! repositories:
//!   - name: myproject
//!     path: /home/dev/myproject
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::model::SplitError;

/// One named repository entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoEntry {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
struct SourceSection {
    #[serde(default)]
    repositories: Vec<RepoEntry>,
}

/// Parsed repositories config.
#[derive(Debug, Default, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    repositories: Vec<RepoEntry>,

    #[serde(default)]
    source: Option<SourceSection>,
}

impl SourceConfig {
    /// Load from a YAML or JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .build()
            .with_context(|| format!("failed to load source config {}", path.display()))?;
        cfg.try_deserialize()
            .with_context(|| format!("failed to parse source config {}", path.display()))
    }

    fn entries(&self) -> impl Iterator<Item = &RepoEntry> {
        self.repositories.iter().chain(
            self.source
                .as_ref()
                .map(|s| s.repositories.as_slice())
                .unwrap_or_default(),
        )
    }

    /// Resolve a repository name to its configured path.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        self.entries()
            .find(|e| e.name == name)
            .map(|e| PathBuf::from(&e.path))
            .ok_or_else(|| SplitError::UnknownRepo(name.to_string()).into())
    }
}
