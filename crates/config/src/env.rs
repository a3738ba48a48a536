//! Environment-derived settings for the source adapters.
//!
//! Everything the adapters need from the process environment is captured here
//! once, so adapter code never calls `std::env::var` itself.

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::schema::SourcesSection;

/// Token variables for git over HTTPS, highest priority first.
pub const GIT_TOKEN_VARS: &[&str] = &["GIT_TOKEN", "GITHUB_TOKEN", "GITLAB_TOKEN", "GITEA_TOKEN"];

/// Username sent alongside a token.
pub const TOKEN_USERNAME: &str = "oauth2";

/// HTTPS credentials for git remotes.
#[derive(Debug, Clone)]
pub struct GitCredentials {
    pub username: String,
    pub password: SecretString,
}

impl GitCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Resolved adapter settings: file config overlaid with environment.
#[derive(Debug, Clone, Default)]
pub struct SourcesConfig {
    /// Raw GOPROXY chain string. Empty means "use the default chain".
    pub goproxy: String,
    pub git_credentials: Option<GitCredentials>,
    /// Parent directory for ephemeral downloads (`SKILLPM_TMPDIR`).
    pub temp_dir: Option<PathBuf>,
    /// Where the go.mod search starts.
    pub work_dir: Option<PathBuf>,
}

impl SourcesConfig {
    /// Build from the file section plus the real process environment.
    pub fn from_env(section: &SourcesSection) -> Self {
        Self::from_lookup(section, |name| std::env::var(name).ok())
    }

    /// Build from the file section plus a custom variable lookup.
    pub fn from_lookup(section: &SourcesSection, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let goproxy = lookup("GOPROXY")
            .or_else(|| section.goproxy.clone())
            .unwrap_or_default();
        let temp_dir = lookup("SKILLPM_TMPDIR")
            .map(PathBuf::from)
            .or_else(|| section.temp_dir.clone());

        Self {
            goproxy,
            git_credentials: git_credentials_from(lookup),
            temp_dir,
            work_dir: section.work_dir.clone(),
        }
    }
}

fn git_credentials_from(lookup: impl Fn(&str) -> Option<String>) -> Option<GitCredentials> {
    if let Some(token) = GIT_TOKEN_VARS.iter().find_map(|name| lookup(name)) {
        return Some(GitCredentials::new(TOKEN_USERNAME, token));
    }
    match (lookup("GIT_USERNAME"), lookup("GIT_PASSWORD")) {
        (Some(username), Some(password)) => Some(GitCredentials::new(username, password)),
        _ => None,
    }
}
