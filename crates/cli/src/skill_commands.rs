use {
    anyhow::{Context, Result},
    clap::Args,
    skillpm_skills::{InstallOutcome, Skill, SkillManager, Source, SourceKind},
    tokio_util::sync::CancellationToken,
};

#[derive(Args)]
pub struct AddArgs {
    /// Directory name the skill is installed under.
    pub name: String,
    /// `<kind>:<locator>`, e.g. `git:https://github.com/acme/skills`,
    /// `npm:@acme/pdf-skill`, `go-module:github.com/acme/skill`.
    #[arg(value_parser = parse_source)]
    pub source: Source,
    /// Version to pin. Empty resolves the latest on install.
    #[arg(long, default_value = "")]
    pub version: String,
    /// Install only this directory of the downloaded content.
    #[arg(long)]
    pub subdirectory: Option<String>,
    /// Adapter option, e.g. `--option registry=https://npm.internal`.
    #[arg(long = "option", value_parser = parse_key_val)]
    pub options: Vec<(String, String)>,
}

fn parse_source(s: &str) -> Result<Source, String> {
    let (kind, locator) = s
        .split_once(':')
        .ok_or_else(|| format!("expected <kind>:<locator>, got '{s}'"))?;
    let kind: SourceKind = kind.parse().map_err(|e| format!("{e}"))?;
    Source::new(kind, locator).map_err(|e| e.to_string())
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    Ok((k.trim().to_string(), v.trim().to_string()))
}

pub fn add(manager: &SkillManager, args: AddArgs) -> Result<()> {
    let source = args
        .options
        .into_iter()
        .fold(args.source, |source, (k, v)| source.with_option(k, v));
    let mut skill = Skill::new(&args.name, source);
    skill.version = args.version;
    skill.subdirectory = args.subdirectory;
    manager.add_skill(skill)?;
    println!("Added '{}'. Run `skillpm install {}` to fetch it.", args.name, args.name);
    Ok(())
}

pub fn list(manager: &SkillManager, json: bool) -> Result<()> {
    let manifest = manager.manifest()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }
    if manifest.skills.is_empty() {
        println!("No skills configured.");
        return Ok(());
    }
    for skill in &manifest.skills {
        let version: &str = if skill.version.is_empty() {
            "(not installed)"
        } else {
            &skill.version
        };
        let digest = skill
            .digest
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        println!("  {}  {}  {}  {}", skill.name, skill.source, version, digest);
    }
    Ok(())
}

fn print_outcome(outcome: &InstallOutcome) {
    for warning in &outcome.warnings {
        eprintln!("warning: {}", warning.to_error());
    }
    match &outcome.digest {
        Some(digest) => println!("Installed {} {} ({digest})", outcome.name, outcome.version),
        None => println!(
            "Installed {} {} (integrity from go.sum)",
            outcome.name, outcome.version
        ),
    }
}

pub async fn install(
    manager: &SkillManager,
    name: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let outcomes = manager
        .install(name, cancel)
        .await
        .context("install failed")?;
    if outcomes.is_empty() {
        println!("Nothing to install.");
    }
    outcomes.iter().for_each(print_outcome);
    Ok(())
}

pub async fn update(
    manager: &SkillManager,
    name: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let outcomes = manager
        .update(name, cancel)
        .await
        .context("update failed")?;
    for outcome in &outcomes {
        if outcome.changed() {
            let previous: &str = if outcome.previous_version.is_empty() {
                "(none)"
            } else {
                &outcome.previous_version
            };
            println!(
                "{}: {previous} -> {}",
                outcome.installed.name, outcome.installed.version
            );
        } else {
            println!(
                "{}: already at {}",
                outcome.installed.name, outcome.installed.version
            );
        }
        for warning in &outcome.installed.warnings {
            eprintln!("warning: {}", warning.to_error());
        }
    }
    Ok(())
}

pub async fn uninstall(manager: &SkillManager, name: &str) -> Result<()> {
    manager.uninstall(name).await?;
    println!("Uninstalled '{name}'.");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_spec_splits_on_first_colon() {
        let source = parse_source("git:https://github.com/acme/skills.git").unwrap();
        assert_eq!(source.kind, SourceKind::Git);
        assert_eq!(source.locator, "https://github.com/acme/skills.git");

        let go = parse_source("go-module:github.com/acme/skill").unwrap();
        assert_eq!(go.kind, SourceKind::GoModule);
    }

    #[test]
    fn bad_source_specs_are_rejected() {
        assert!(parse_source("https://github.com/acme").is_err());
        assert!(parse_source("svn:repo").is_err());
        assert!(parse_source("npm:").is_err());
        assert!(parse_source("npm").is_err());
    }

    #[test]
    fn key_value_options() {
        assert_eq!(
            parse_key_val("registry=https://npm.internal").unwrap(),
            ("registry".to_string(), "https://npm.internal".to_string())
        );
        assert!(parse_key_val("registry").is_err());
    }
}
