use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    schema::SkillpmConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "skillpm.toml",
    "skillpm.yaml",
    "skillpm.yml",
    "skillpm.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<SkillpmConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./skillpm.{toml,yaml,yml,json}` (project-local)
/// 2. `<config_dir>/skillpm.{toml,yaml,yml,json}` (user-global)
///
/// Returns `SkillpmConfig::default()` if no config file is found or the one
/// found cannot be parsed.
pub fn discover_and_load() -> SkillpmConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    SkillpmConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// User-global config directory.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "skillpm").map(|d| d.config_dir().to_path_buf())
}

/// Data directory holding the manifest. `override_dir` (from `--data-dir` or
/// `SKILLPM_DATA_DIR`) wins when given.
pub fn data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    directories::ProjectDirs::from("", "", "skillpm")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".skillpm"))
}

fn parse_config(raw: &str, path: &Path) -> Result<SkillpmConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| Error::parse_toml(path, e)),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| Error::parse_yaml(path, e)),
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse_json(path, e)),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}
