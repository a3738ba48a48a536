//! Configuration loading for skillpm.
//!
//! Config files: `skillpm.toml`, `skillpm.yaml`, or `skillpm.json`
//! Searched in `./` then the user config dir (`~/.config/skillpm/` on Linux).
//!
//! Process environment is read once, at startup, into [`SourcesConfig`]; the
//! source adapters only ever see that value.

pub mod env;
pub mod error;
pub mod loader;
pub mod schema;

pub use {
    env::{GitCredentials, SourcesConfig},
    error::{Error, Result},
    loader::{config_dir, data_dir, discover_and_load, load_config},
    schema::{InstallConfig, SkillpmConfig, SourcesSection},
};
