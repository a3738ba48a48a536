use std::path::{Path, PathBuf};

use crate::{error::Result, types::Manifest};

/// Manifest file name inside the data directory.
pub const MANIFEST_FILE: &str = "skills-manifest.json";

/// Persistent manifest storage with atomic writes.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<data_dir>/skills-manifest.json`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(MANIFEST_FILE))
    }

    /// Load manifest from disk, returning a default if missing.
    pub fn load(&self) -> Result<Manifest> {
        if !self.path.exists() {
            return Ok(Manifest::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Save manifest atomically via temp file + rename.
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(manifest)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), skills = manifest.skills.len(), "saved manifest");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
