mod skill_commands;
mod target_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    skillpm_config::{SkillpmConfig, SourcesConfig},
    skillpm_skills::{ManifestStore, SkillManager, SourceRegistry},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "skillpm", version, about = "skillpm: install agent skills from any source")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (default: discover skillpm.{toml,yaml,json}).
    #[arg(long, global = true, env = "SKILLPM_CONFIG")]
    config: Option<PathBuf>,

    /// Custom data directory holding the manifest.
    #[arg(long, global = true, env = "SKILLPM_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a skill in the manifest without installing it.
    Add(skill_commands::AddArgs),
    /// List configured skills.
    List {
        /// Print the manifest as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Install one skill, or all of them, at the recorded version.
    Install { name: Option<String> },
    /// Move one skill, or all of them, to the latest version.
    Update { name: Option<String> },
    /// Remove a skill from every install target and from the manifest.
    Uninstall { name: String },
    /// Manage install targets.
    Target {
        #[command(subcommand)]
        action: target_commands::TargetAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SkillpmConfig> {
    match &cli.config {
        Some(path) => skillpm_config::load_config(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(skillpm_config::discover_and_load()),
    }
}

fn build_manager(cli: &Cli) -> anyhow::Result<SkillManager> {
    let config = load_config(cli)?;
    let store = match &config.install.manifest_path {
        Some(path) => ManifestStore::new(path.clone()),
        None => ManifestStore::in_data_dir(&skillpm_config::data_dir(cli.data_dir.as_deref())),
    };
    debug!(manifest = %store.path().display(), "using manifest");

    let sources = SourcesConfig::from_env(&config.sources);
    let registry = SourceRegistry::with_defaults(&sources)?;
    Ok(SkillManager::new(store, Arc::new(registry))
        .with_max_concurrency(config.install.effective_concurrency()))
}

/// A token cancelled on the first Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling pending downloads");
            on_signal.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let manager = build_manager(&cli)?;

    match cli.command {
        Commands::Add(args) => skill_commands::add(&manager, args),
        Commands::List { json } => skill_commands::list(&manager, json),
        Commands::Install { name } => {
            skill_commands::install(&manager, name.as_deref(), &cancel_on_interrupt()).await
        },
        Commands::Update { name } => {
            skill_commands::update(&manager, name.as_deref(), &cancel_on_interrupt()).await
        },
        Commands::Uninstall { name } => skill_commands::uninstall(&manager, &name).await,
        Commands::Target { action } => target_commands::handle_target(&manager, action),
    }
}
