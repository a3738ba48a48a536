use std::path::PathBuf;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    skillpm_skills::{SkillManager, agents},
};

#[derive(Subcommand)]
pub enum TargetAction {
    /// Add an install target directory, or an agent's default skills directory.
    Add {
        #[arg(required_unless_present = "agent", conflicts_with = "agent")]
        path: Option<PathBuf>,
        /// Agent name: claude, codex, cursor, gemini, opencode.
        #[arg(long)]
        agent: Option<String>,
    },
    /// Stop installing into a directory. Installed copies are kept.
    Remove { path: PathBuf },
    /// List install targets.
    List,
}

pub fn handle_target(manager: &SkillManager, action: TargetAction) -> Result<()> {
    match action {
        TargetAction::Add { path, agent } => {
            let path = match (path, agent) {
                (Some(path), _) => std::path::absolute(&path)?,
                (None, Some(agent)) => agents::resolve_default_dir(&agent)?,
                (None, None) => bail!("either a path or --agent is required"),
            };
            if manager.add_target(path.clone())? {
                println!("Added install target {}", path.display());
            } else {
                println!("{} is already an install target", path.display());
            }
        },
        TargetAction::Remove { path } => {
            let absolute = std::path::absolute(&path)?;
            if manager.remove_target(&absolute)? || manager.remove_target(&path)? {
                println!("Removed install target {}", path.display());
            } else {
                bail!("{} is not an install target", path.display());
            }
        },
        TargetAction::List => {
            let manifest = manager.manifest()?;
            if manifest.install_targets.is_empty() {
                println!("No install targets. Add one with `skillpm target add`.");
            }
            for target in &manifest.install_targets {
                println!("  {}", target.display());
            }
        },
    }
    Ok(())
}
