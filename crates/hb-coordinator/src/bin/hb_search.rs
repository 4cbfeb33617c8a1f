//! hb-search: run a block-parallel search over an in-process cluster.

use anyhow::{Context, Result};
use clap::Parser;
use hb_coordinator::{Coordinator, LocalCluster, RunConfig, SyntheticEvaluator};
use hb_optimizer::{PopulationConfig, StrategyConfig};
use hb_types::SearchSpace;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hb-search", version, about = "Block-parallel hyperparameter search")]
struct Cli {
    /// JSON run configuration. Without one a small demo search runs.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run label used in checkpoint and history file names
    #[arg(long)]
    label: Option<String>,

    /// Number of worker blocks
    #[arg(long)]
    blocks: Option<usize>,

    /// Total ranks, coordinator included
    #[arg(long)]
    world_size: Option<usize>,

    /// Evaluation budget (generations with --population)
    #[arg(long)]
    steps: Option<usize>,

    /// Stop once the best figure of merit drops below this value
    #[arg(long, allow_hyphen_values = true)]
    target_fom: Option<f64>,

    /// Checkpoint to resume from
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Directory for checkpoint and history files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Use the population strategy with this population size
    #[arg(long)]
    population: Option<usize>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

fn demo_config() -> RunConfig {
    let space = SearchSpace::new()
        .add_log_real("learning_rate", 1e-4, 1e-1)
        .add_integer("layers", 1, 8)
        .add_real("dropout", 0.0, 0.5)
        .add_categorical("activation", ["relu", "tanh", "sigmoid"]);
    RunConfig::new("demo", space).with_blocks(2, 5).with_steps(20)
}

fn build_config(cli: &Cli) -> Result<RunConfig> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("reading run configuration {}", path.display()))?,
        None => demo_config(),
    };

    if let Some(label) = &cli.label {
        config.label = label.clone();
    }
    if let Some(blocks) = cli.blocks {
        config.num_blocks = blocks;
    }
    if let Some(world_size) = cli.world_size {
        config.world_size = world_size;
    }
    if let Some(steps) = cli.steps {
        config.steps = steps;
    }
    if let Some(target) = cli.target_fom {
        config.target_fom = Some(target);
    }
    if let Some(resume) = &cli.resume {
        config.resume_from = Some(resume.clone());
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(population_size) = cli.population {
        config.strategy = StrategyConfig::Population(PopulationConfig {
            population_size,
            ..PopulationConfig::default()
        });
    }

    config.validate().context("invalid run configuration")?;
    Ok(config)
}

fn run(config: &RunConfig) -> Result<()> {
    let layout = config.layout()?;
    let mut cluster = LocalCluster::launch(&layout, |ctx| {
        SyntheticEvaluator::new(
            config.search_space.clone(),
            config.objective.clone(),
            ctx.rank,
        )
    })?;
    let endpoint = cluster
        .take_coordinator()
        .context("coordinator endpoint already taken")?;

    let mut coordinator = Coordinator::from_config(endpoint, config)?;
    let summary = coordinator.run_search(config.steps)?;
    let stats = cluster.join()?;

    info!(
        evaluations = summary.evaluations,
        folds = summary.folds,
        stopped_early = summary.stopped_early,
        workers = stats.len(),
        history = %summary.history.display(),
        "run complete"
    );
    match &summary.best {
        Some(best) => println!("best fom {} at {}", best.fom, best.params),
        None => println!("no result observed"),
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let result = build_config(&cli).and_then(|config| run(&config));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("hb-search: {e:#}");
            ExitCode::FAILURE
        }
    }
}
