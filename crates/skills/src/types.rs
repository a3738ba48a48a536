use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ── Sources ──────────────────────────────────────────────────────────────────

/// Supported source kinds. The string form is the dispatch key and the value
/// persisted in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Git,
    Npm,
    Pip,
    Cargo,
    GoModule,
}

impl SourceKind {
    pub const ALL: [Self; 5] = [Self::Git, Self::Npm, Self::Pip, Self::Cargo, Self::GoModule];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Npm => "npm",
            Self::Pip => "pip",
            Self::Cargo => "cargo",
            Self::GoModule => "go-module",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| {
                Error::invalid_source(format!(
                    "unknown source kind '{s}' (expected one of: git, npm, pip, cargo, go-module)"
                ))
            })
    }
}

/// Where a skill comes from: kind, locator (URL, package or module path) and
/// adapter-specific options such as an alternate `registry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub kind: SourceKind,
    pub locator: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl Source {
    pub fn new(kind: SourceKind, locator: impl Into<String>) -> Result<Self> {
        let source = Self {
            kind,
            locator: locator.into(),
            options: BTreeMap::new(),
        };
        source.validate()?;
        Ok(source)
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Reject descriptors no adapter could use. Runs before any network call.
    pub fn validate(&self) -> Result<()> {
        let locator = self.locator.trim();
        if locator.is_empty() {
            return Err(Error::invalid_source(format!(
                "{} source has an empty locator",
                self.kind
            )));
        }
        // Locators end up as command arguments (git, go `direct`).
        if locator.starts_with('-') {
            return Err(Error::invalid_source(format!(
                "{} locator '{locator}' must not start with '-'",
                self.kind
            )));
        }
        Ok(())
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.locator)
    }
}

// ── Integrity ────────────────────────────────────────────────────────────────

/// A content digest. `value` embeds the algorithm as a prefix
/// (`h1:<base64>`), so comparing two values also compares algorithms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityDigest {
    pub algorithm: String,
    pub value: String,
}

impl IntegrityDigest {
    /// Recover the algorithm from a bare prefixed value.
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once(':') {
            Some((algorithm, rest)) if !algorithm.is_empty() && !rest.is_empty() => Ok(Self {
                algorithm: algorithm.to_string(),
                value: value.to_string(),
            }),
            _ => Err(Error::message(format!(
                "malformed digest '{value}': expected '<algorithm>:<value>'"
            ))),
        }
    }
}

impl fmt::Display for IntegrityDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// ── Manifest ─────────────────────────────────────────────────────────────────

/// One configured skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub source: Source,
    /// Last installed version; empty until first install.
    #[serde(default)]
    pub version: String,
    /// Install only this directory of the downloaded content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdirectory: Option<String>,
    /// Absent when integrity is vouched for by the ecosystem's own checksum
    /// ledger (go.mod-derived go-module versions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<IntegrityDigest>,
}

impl Skill {
    pub fn new(name: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            source,
            version: String::new(),
            subdirectory: None,
            digest: None,
        }
    }

    /// The name becomes a directory in every install target, so it must be a
    /// single plain path component.
    pub fn validate_name(&self) -> Result<()> {
        let mut components = Path::new(&self.name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !self.name.contains(['/', '\\']) => Ok(()),
            _ => Err(Error::invalid_source(format!(
                "skill name '{}' must be a single path component",
                self.name
            ))),
        }
    }
}

/// Persisted record of configured skills and install targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_manifest_version")]
    pub version: u32,
    #[serde(default)]
    pub skills: Vec<Skill>,
    #[serde(default)]
    pub install_targets: BTreeSet<PathBuf>,
}

fn default_manifest_version() -> u32 {
    1
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: default_manifest_version(),
            skills: Vec::new(),
            install_targets: BTreeSet::new(),
        }
    }
}

impl Manifest {
    pub fn find(&self, name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.skills.iter().position(|s| s.name == name)
    }

    /// Insert or replace by name, keeping the original position on replace.
    pub fn upsert_skill(&mut self, skill: Skill) {
        match self.position(&skill.name) {
            Some(idx) => self.skills[idx] = skill,
            None => self.skills.push(skill),
        }
    }

    /// Returns the removed entry, if any.
    pub fn remove_skill(&mut self, name: &str) -> Option<Skill> {
        let idx = self.position(name)?;
        Some(self.skills.remove(idx))
    }

    /// Returns `false` if the target was already configured.
    pub fn add_target(&mut self, path: PathBuf) -> bool {
        self.install_targets.insert(path)
    }

    pub fn remove_target(&mut self, path: &Path) -> bool {
        self.install_targets.remove(path)
    }
}
