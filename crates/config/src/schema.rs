//! Config schema types.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default number of skills processed concurrently in one batch.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillpmConfig {
    pub install: InstallConfig,
    pub sources: SourcesSection,
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Where the manifest lives. Defaults to `<data_dir>/skills-manifest.json`.
    pub manifest_path: Option<PathBuf>,
    /// Upper bound on per-skill workers running at once.
    pub max_concurrency: usize,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            manifest_path: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl InstallConfig {
    /// Concurrency limit, never below one.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

/// File-level defaults for source adapters. Environment variables take
/// precedence, see [`crate::SourcesConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesSection {
    /// GOPROXY-style chain, e.g. `https://proxy.golang.org,direct`.
    pub goproxy: Option<String>,
    /// Parent directory for ephemeral downloads.
    pub temp_dir: Option<PathBuf>,
    /// Directory where the go.mod search starts. Defaults to the process cwd.
    pub work_dir: Option<PathBuf>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let cfg: SkillpmConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.install.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert!(cfg.install.manifest_path.is_none());
        assert!(cfg.sources.goproxy.is_none());
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let cfg: SkillpmConfig = toml::from_str("[install]\nmax_concurrency = 0\n").unwrap();
        assert_eq!(cfg.install.effective_concurrency(), 1);
    }
}
