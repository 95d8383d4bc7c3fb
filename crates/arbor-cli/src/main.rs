//! Arbor CLI - recursive agent trees from a single vision
//!
//! Usage:
//!   arbor run <vision>          Plant a root agent and run the tree to completion
//!   arbor init                  Write a default `.arbor/config.toml`
//!   arbor config                Print the effective configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use arbor_agent::{AnthropicClient, Model};
use arbor_core::config::ArborConfig;
use arbor_core::{AgentResult, Phase, Specialization, StatusQuery, TreeStatus, Usd};
use arbor_orchestrator::{
    ActivityLogger, AgentTreeManager, BudgetGovernor, Principal, RootConfig, TreeServices,
};
use arbor_tools::ToolDispatcher;
use arbor_validation::{CommandGate, CompletionGate, StaticGate};

#[derive(Parser)]
#[command(name = "arbor")]
#[command(author, version, about = "Recursive agent orchestration from a single vision")]
struct Cli {
    /// Enable verbose logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a root agent on a vision
    Run(RunArgs),

    /// Write a default configuration to .arbor/config.toml
    Init {
        /// Repository path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration, including detected gate checks
    Config {
        /// Repository path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// What the root agent should achieve
    vision: String,

    /// Working directory for the tree
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Phase the root starts in (explore, plan, found, summon)
    #[arg(long)]
    phase: Option<Phase>,

    /// Specialization of the root agent
    #[arg(long)]
    specialization: Option<Specialization>,

    /// Maximum reasoning iterations per agent
    #[arg(short = 'n', long)]
    max_iterations: Option<u32>,

    /// Root budget ceiling in USD
    #[arg(short, long)]
    budget: Option<Usd>,

    /// Maximum tree depth (root is depth 0)
    #[arg(long)]
    max_depth: Option<u32>,

    /// Model to use
    #[arg(short, long)]
    model: Option<CliModel>,

    /// Tools describe mutations instead of performing them
    #[arg(long)]
    dry_run: bool,

    /// Skip completion checks; COMPLETE is always accepted
    #[arg(long)]
    no_gate: bool,

    /// Let budget ceilings be exceeded (operator use only)
    #[arg(long)]
    unlimited_budget: bool,

    /// Print the result and tree as JSON
    #[arg(long)]
    json: bool,
}

/// CLI-friendly model enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliModel {
    Opus,
    Sonnet,
    Haiku,
}

impl From<CliModel> for Model {
    fn from(m: CliModel) -> Self {
        match m {
            CliModel::Opus => Model::Opus,
            CliModel::Sonnet => Model::Sonnet,
            CliModel::Haiku => Model::Haiku,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Init { path, force } => cmd_init(&path, force).map(|_| ExitCode::SUCCESS),
        Commands::Config { path } => cmd_config(&path).map(|_| ExitCode::SUCCESS),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    let config_path = path.join(".arbor/config.toml");
    if config_path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite",
            config_path.display()
        );
    }

    ArborConfig::write_default(path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Initialized Arbor in {}", path.display());
    println!("Created:");
    println!("  .arbor/config.toml");
    if let Some(lang) = ArborConfig::detect_language(path) {
        println!("\nDetected {:?}; completion checks default to its toolchain.", lang);
    }
    println!("\nNext: arbor run \"<vision>\"");
    Ok(())
}

fn cmd_config(path: &Path) -> Result<()> {
    let mut config = ArborConfig::load_or_default(path).context("Failed to load configuration")?;
    config.gate = config.effective_gate(path);
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Apply command-line overrides on top of the repository configuration
fn apply_overrides(config: &mut ArborConfig, args: &RunArgs) {
    if let Some(max) = args.max_iterations {
        config.engine.max_iterations = max;
    }
    if let Some(depth) = args.max_depth {
        config.engine.max_depth = depth;
    }
    if let Some(phase) = args.phase {
        config.engine.start_phase = phase;
    }
    if let Some(model) = args.model {
        config.models.default = Model::from(model).to_string();
    }
}

async fn cmd_run(args: RunArgs) -> Result<ExitCode> {
    let dir = args
        .dir
        .canonicalize()
        .with_context(|| format!("Working directory {} not found", args.dir.display()))?;

    let mut config = ArborConfig::load_or_default(&dir).context("Failed to load configuration")?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    let mut root_config =
        RootConfig::from_config(&config, args.vision.clone(), dir.clone()).context("Invalid configuration")?;
    if let Some(budget) = args.budget {
        root_config.budget_ceiling = budget;
    }
    if let Some(specialization) = args.specialization {
        root_config.specialization = specialization;
    }
    if root_config.start_phase == Phase::Complete {
        bail!("a root cannot start in COMPLETE");
    }
    root_config.engine.dry_run = args.dry_run;

    let reasoning = AnthropicClient::from_env(&config.models.api_key_env)
        .context("Failed to set up the reasoning client")?;

    let gate: Arc<dyn CompletionGate> = if args.no_gate || args.dry_run {
        info!("Completion gate disabled");
        Arc::new(StaticGate::allow())
    } else {
        let gate = CommandGate::for_repo(&config, &dir);
        info!(compile = ?gate.config().compile, checks = gate.config().checks.len(), "Completion gate ready");
        Arc::new(gate)
    };

    let principal = if args.unlimited_budget {
        Principal::admin(local_user())
    } else {
        Principal::user(local_user())
    };

    let services = TreeServices {
        reasoning: Arc::new(reasoning),
        tools: Arc::new(ToolDispatcher::with_builtin_tools()),
        gate,
        governor: Arc::new(BudgetGovernor::new(principal)),
        sink: Arc::new(ActivityLogger::new(dir.join(".arbor"))),
    };

    let (manager, root) = AgentTreeManager::create_root(services, root_config)
        .await
        .context("Failed to create root agent")?;

    if !args.json {
        println!("Arbor root {} on {}", root.id.short(), root.branch);
        println!("Vision: {}", root.vision);
        println!("Budget: {}  Max depth: {}", root.budget_ceiling, manager.max_depth());
        if args.dry_run {
            println!("Dry run: no files or git state will change");
        }
        println!();
    }

    let watcher = {
        let manager = manager.clone();
        let root_id = root.id;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling agent tree");
                if let Err(e) = manager.cancel(&root_id).await {
                    warn!(error = %e, "Failed to cancel agent tree");
                }
            }
        })
    };

    let result = manager.run_root().await.context("Agent tree failed to run")?;
    watcher.abort();

    let status = manager.get_tree_status(&StatusQuery::default()).await;
    if args.json {
        print_json(&result, &status)?;
    } else {
        print_report(&result, &status, &manager.get_tree_visualization().await);
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn local_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "local".to_string())
}

#[derive(Serialize)]
struct RunReport<'a> {
    result: &'a AgentResult,
    tree: &'a TreeStatus,
}

fn print_json(result: &AgentResult, status: &TreeStatus) -> Result<()> {
    let report = RunReport { result, tree: status };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_report(result: &AgentResult, status: &TreeStatus, tree: &str) {
    println!("{}", result.report());
    println!("Tree");
    println!("====");
    print!("{}", tree);
    println!(
        "\n{} agent(s): {} completed, {} failed, {} cancelled. Total cost {}",
        status.total_nodes,
        status.completed_nodes,
        status.failed_nodes,
        status.cancelled_nodes,
        status.total_cost
    );
}
