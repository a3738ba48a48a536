//! Default skill directories of known coding agents, used to seed install
//! targets.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// An agent whose skills directory can be located.
pub trait AgentDirectory: Send + Sync {
    fn agent_name(&self) -> &str;

    fn resolve_default_dir(&self) -> Result<PathBuf>;
}

/// An agent whose skills live at a fixed path under the home directory.
#[derive(Debug, Clone, Copy)]
pub struct HomeAgent {
    name: &'static str,
    relative: &'static str,
}

impl HomeAgent {
    pub const fn new(name: &'static str, relative: &'static str) -> Self {
        Self { name, relative }
    }

    /// The skills directory relative to an explicit home.
    pub fn dir_under(&self, home: &Path) -> PathBuf {
        home.join(self.relative)
    }
}

impl AgentDirectory for HomeAgent {
    fn agent_name(&self) -> &str {
        self.name
    }

    fn resolve_default_dir(&self) -> Result<PathBuf> {
        let dirs = directories::BaseDirs::new()
            .ok_or_else(|| Error::message("could not determine home directory"))?;
        Ok(self.dir_under(dirs.home_dir()))
    }
}

pub const BUILTIN_AGENTS: &[HomeAgent] = &[
    HomeAgent::new("claude", ".claude/skills"),
    HomeAgent::new("codex", ".codex/skills"),
    HomeAgent::new("cursor", ".cursor/skills"),
    HomeAgent::new("gemini", ".gemini/skills"),
    HomeAgent::new("opencode", ".config/opencode/skills"),
];

pub fn find_agent(name: &str) -> Result<&'static HomeAgent> {
    BUILTIN_AGENTS
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| {
            let known: Vec<_> = BUILTIN_AGENTS.iter().map(|a| a.name).collect();
            Error::message(format!(
                "unknown agent '{name}' (known: {})",
                known.join(", ")
            ))
        })
}

/// Default skills directory for the named agent.
pub fn resolve_default_dir(agent_name: &str) -> Result<PathBuf> {
    find_agent(agent_name)?.resolve_default_dir()
}
