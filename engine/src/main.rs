use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use want_core::executor::LocalRegistry;
use want_core::{AgentRegistry, ChainBuilder, EngineConfig, NotificationBus, SchedulerWant};
use want_types::{Dynamic, DynamicMap, WantIdentity, WantMetadata, WantSpec};

#[derive(Parser, Debug)]
#[command(name = "want-engine")]
#[command(about = "Headless Want reconciliation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the reconcile loop (chain builder progress + scheduler Want
    /// progress) until interrupted.
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Expand a recipe file into its Want graph, run one reconcile pass
    /// over the result, then print the settled state of every want.
    Apply {
        recipe: PathBuf,
        #[arg(long, default_value = "instance")]
        prefix: String,
        /// Parameter overrides, `key=value`, may repeat.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Dynamic)>,
    },
    /// Parse and structurally validate a recipe file without expanding it.
    Validate { recipe: PathBuf },
}

fn parse_param(raw: &str) -> Result<(String, Dynamic), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let parsed = serde_yaml::from_str(value).unwrap_or_else(|_| Dynamic::String(value.to_string()));
    Ok((key.to_string(), parsed))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logs_dir = want_observability::default_logs_dir();
    let (_info, _guard) = want_observability::init(want_observability::ProcessKind::Engine, logs_dir.as_deref())?;

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => run_serve(config).await?,
        Command::Apply { recipe, prefix, params } => run_apply(&recipe, &prefix, params).await?,
        Command::Validate { recipe } => run_validate(&recipe)?,
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> EngineConfig {
    match path {
        Some(path) => EngineConfig::load(&path).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), error = %err, "failed to load engine config, falling back to environment");
            EngineConfig::from_env()
        }),
        None => EngineConfig::from_env(),
    }
}

async fn run_serve(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path);
    info!(poll_ms = config.scheduler_poll_ms, "starting want-engine reconcile loop");

    let registry = AgentRegistry::new();
    let local_agents = LocalRegistry::new();
    let bus = NotificationBus::new();
    let chain = ChainBuilder::new(registry, local_agents, bus);
    let scheduler = SchedulerWant::new(chain.clone());

    let poll = Duration::from_millis(config.scheduler_poll_ms);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, stopping reconcile loop");
                scheduler.stop_all().await;
                break;
            }
            _ = tokio::time::sleep(poll) => {
                chain.progress_all().await;
                scheduler.progress().await;
            }
        }
    }

    Ok(())
}

async fn run_apply(recipe_path: &PathBuf, prefix: &str, param_overrides: Vec<(String, Dynamic)>) -> anyhow::Result<()> {
    let recipe = want_recipes::load_recipe_file(recipe_path).context("failed to load recipe")?;

    let mut overrides: DynamicMap = DynamicMap::new();
    for (key, value) in param_overrides {
        overrides.insert(key, value);
    }

    let instantiated = want_recipes::expand_recipe(&recipe, prefix, &overrides)
        .context("recipe expanded to an invalid owner-reference graph")?;
    info!(recipe = recipe.metadata.name, count = instantiated.len(), "expanded recipe");

    let registry = AgentRegistry::new();
    let local_agents = LocalRegistry::new();
    let bus = NotificationBus::new();
    let chain = ChainBuilder::new(registry, local_agents, bus);

    for iw in &instantiated {
        let identity = WantIdentity {
            id: iw.id.clone(),
            name: iw.name.clone(),
            want_type: iw.want_type.clone(),
        };
        let mut metadata = WantMetadata::default();
        metadata.labels = iw.labels.clone();
        metadata.owner_references = iw.owner_references.clone();

        let mut spec = WantSpec::default();
        spec.params = iw.params.clone();
        spec.using = iw.using.clone();
        spec.requires = iw.requires.iter().cloned().map(want_types::Requirement).collect();
        spec.when = iw.when.clone();

        let want = want_core::Want::new(identity, metadata, spec);
        chain.submit(want).await;
    }

    chain.progress_all().await;

    for want in chain.all_wants().await {
        let state = want.snapshot_state().await;
        let rendered = serde_yaml::to_string(&state)?;
        println!("# {}", want.name());
        println!("{rendered}");
    }

    Ok(())
}

fn run_validate(recipe_path: &PathBuf) -> anyhow::Result<()> {
    let recipe = want_recipes::load_recipe_file(recipe_path).context("recipe validation failed")?;
    println!("ok: '{}' ({} wants)", recipe.metadata.name, recipe.wants.len());
    Ok(())
}
