use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geoffrussy::config::Config;
use geoffrussy::engine::executor::NullTaskExecutor;
use geoffrussy::engine::ExecutionEngine;
use geoffrussy::store::Store;
use geoffrussy::tagger::GitTagger;
use geoffrussy::{blockers, checkpoint, config, detours, progress, quota, tokens};
use geoffrussy_common::{Phase, PhaseStatus, Project, ProjectStage};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "geoffrussy")]
#[command(version, about = "Project-development agent: execution and persistence spine")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a project's state store
    Init {
        #[arg(long)]
        name: Option<String>,
    },
    /// Show overall project progress
    Status,
    /// List phases with their task breakdown
    Phases,
    /// Drive execution of a phase (or all remaining phases) with the null executor
    Run {
        #[arg(short, long)]
        phase: Option<i64>,
    },
    /// Token/cost statistics
    Stats,
    /// Manage checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Manage blockers
    Blockers {
        #[command(subcommand)]
        command: BlockerCommands,
    },
    /// Quota and rate-limit status
    Quota {
        #[command(subcommand)]
        command: QuotaCommands,
    },
    /// Manage mid-execution detours
    Detour {
        #[command(subcommand)]
        command: DetourCommands,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum CheckpointCommands {
    Create { name: String },
    List,
    Restore { id: String },
}

#[derive(Subcommand)]
enum BlockerCommands {
    List,
    Resolve { id: String, resolution: String },
}

#[derive(Subcommand)]
enum QuotaCommands {
    Check { provider: String },
}

#[derive(Subcommand)]
enum DetourCommands {
    Request {
        phase_id: String,
        task_id: String,
        description: String,
        reason: String,
    },
    List,
    Complete { id: String },
    Cancel { id: String },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    Show,
    Init,
}

const PROJECT_ID: &str = "default";

fn project_name_from_dir(project_dir: &std::path::Path) -> String {
    project_dir.file_name().and_then(|n| n.to_str()).unwrap_or("project").to_string()
}

async fn open_store(config: &Config) -> Result<Store> {
    Ok(Store::open(&config.db_path).await.context("failed to open state store")?)
}

/// Fetches the default project, creating it on first use.
async fn ensure_project(store: &Store, name: &str) -> Result<Project> {
    match store.get_project(PROJECT_ID).await {
        Ok(project) => Ok(project),
        Err(_) => {
            let project = Project {
                id: PROJECT_ID.to_string(),
                name: name.to_string(),
                created_at: chrono::Utc::now(),
                current_stage: ProjectStage::Init,
                current_phase_id: None,
            };
            store.save_project(&project).await?;
            Ok(project)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init { name } => cmd_init(&project_dir, name.as_deref(), cli.verbose).await,
        Commands::Status => cmd_status(&project_dir, cli.verbose).await,
        Commands::Phases => cmd_phases(&project_dir, cli.verbose).await,
        Commands::Run { phase } => cmd_run(&project_dir, cli.verbose, *phase).await,
        Commands::Stats => cmd_stats(&project_dir, cli.verbose).await,
        Commands::Checkpoint { command } => cmd_checkpoint(&project_dir, cli.verbose, command).await,
        Commands::Blockers { command } => cmd_blockers(&project_dir, cli.verbose, command).await,
        Commands::Quota { command } => cmd_quota(&project_dir, cli.verbose, command).await,
        Commands::Detour { command } => cmd_detour(&project_dir, cli.verbose, command).await,
        Commands::Config { command } => cmd_config(&project_dir, command.clone()).await,
    }
}

async fn cmd_init(project_dir: &std::path::Path, name: Option<&str>, verbose: bool) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    config.ensure_directories()?;
    let _guard = geoffrussy::logging::init(&config.log_dir, verbose)?;

    let store = open_store(&config).await?;
    let name = name.map(str::to_string).unwrap_or_else(|| project_name_from_dir(project_dir));
    let project = ensure_project(&store, &name).await?;

    println!("Initialized geoffrussy project '{}' at {}", project.name, config.state_dir.display());
    println!("  state db:    {}", config.db_path.display());
    println!("  checkpoints: {}", config.checkpoints_dir.display());
    Ok(())
}

async fn cmd_status(project_dir: &std::path::Path, verbose: bool) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    config.ensure_directories()?;
    let store = open_store(&config).await?;
    ensure_project(&store, &project_name_from_dir(project_dir)).await?;

    let stats = progress::get_progress(&store, PROJECT_ID).await?;
    println!("Project Status");
    println!("==============");
    println!("Phases:    {}/{} completed", stats.completed_phases, stats.total_phases);
    println!("Tasks:     {}/{} completed ({:.1}%)", stats.completed_tasks, stats.total_tasks, stats.completion_percentage);
    if let Some(eta) = stats.estimated_remaining {
        println!("ETA:       ~{}s remaining", eta.as_secs());
    }
    Ok(())
}

async fn cmd_phases(project_dir: &std::path::Path, verbose: bool) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    config.ensure_directories()?;
    let store = open_store(&config).await?;
    ensure_project(&store, &project_name_from_dir(project_dir)).await?;

    let phases = store.list_phases(PROJECT_ID).await?;
    if phases.is_empty() {
        println!("No phases yet.");
        return Ok(());
    }
    println!("{:<5} {:<30} {:<12}", "#", "Title", "Status");
    for phase in phases {
        println!("{:<5} {:<30} {:?}", phase.number, phase.title, phase.status);
    }
    Ok(())
}

async fn cmd_run(project_dir: &std::path::Path, verbose: bool, phase_number: Option<i64>) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    config.ensure_directories()?;
    let _guard = geoffrussy::logging::init(&config.log_dir, verbose)?;

    let store = Arc::new(open_store(&config).await?);
    ensure_project(&store, &project_name_from_dir(project_dir)).await?;

    let phases = store.list_phases(PROJECT_ID).await?;
    let targets: Vec<Phase> = match phase_number {
        Some(n) => phases.into_iter().filter(|p| p.number == n).collect(),
        None => phases.into_iter().filter(|p| p.status != PhaseStatus::Completed).collect(),
    };
    if targets.is_empty() {
        println!("Nothing to run.");
        return Ok(());
    }

    let blocker_tracker = Arc::new(blockers::BlockerTracker::new(config.failure_threshold()));
    let (engine, mut updates) = ExecutionEngine::new(store.clone(), Arc::new(NullTaskExecutor), blocker_tracker, "null");

    let listener = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            println!("[{:?}] phase={} task={} {}", update.update_type, update.phase_id, update.task_id, update.content);
        }
    });

    for phase in targets {
        if let Err(err) = engine.execute_phase(PROJECT_ID, &phase.id).await {
            println!("phase {} halted: {err}", phase.number);
            break;
        }
    }
    engine.close();
    drop(engine);
    listener.await.ok();
    Ok(())
}

async fn cmd_stats(project_dir: &std::path::Path, verbose: bool) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    config.ensure_directories()?;
    let store = open_store(&config).await?;
    ensure_project(&store, &project_name_from_dir(project_dir)).await?;

    let (input, output) = tokens::get_total_tokens(&store, PROJECT_ID).await?;
    println!("Token usage: {input} in / {output} out");

    match tokens::check_budget(&store, PROJECT_ID, config.budget_limit()).await? {
        tokens::BudgetCheck::Ok => println!("Budget: within limits"),
        tokens::BudgetCheck::Warning(msg) => println!("Budget: {msg}"),
        tokens::BudgetCheck::Exceeded => println!("Budget: exceeded"),
    }

    let by_provider = tokens::get_tokens_by_provider(&store, PROJECT_ID).await?;
    for (provider, total) in by_provider {
        println!("  {provider}: {total} tokens");
    }
    Ok(())
}

async fn cmd_checkpoint(project_dir: &std::path::Path, verbose: bool, command: &CheckpointCommands) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    config.ensure_directories()?;
    let store = open_store(&config).await?;
    ensure_project(&store, &project_name_from_dir(project_dir)).await?;
    let tagger = GitTagger::open(project_dir).context("checkpoints require project_dir to be a git repository")?;

    match command {
        CheckpointCommands::Create { name } => {
            let cp = checkpoint::create_checkpoint(&store, &tagger, &config.checkpoints_dir, PROJECT_ID, name, None).await?;
            println!("Created checkpoint {} ({})", cp.id, cp.external_tag);
        }
        CheckpointCommands::List => {
            let list = checkpoint::list_checkpoints(&store, PROJECT_ID).await?;
            for cp in list {
                println!("{}  {}  {}", cp.id, cp.name, cp.created_at.to_rfc3339());
            }
        }
        CheckpointCommands::Restore { id } => {
            let list = checkpoint::list_checkpoints(&store, PROJECT_ID).await?;
            let cp = list.into_iter().find(|c| &c.id == id).context("checkpoint not found")?;
            checkpoint::restore_checkpoint(&store, &tagger, &config.checkpoints_dir, &cp).await?;
            println!("Restored checkpoint {id}");
        }
    }
    Ok(())
}

async fn cmd_blockers(project_dir: &std::path::Path, verbose: bool, command: &BlockerCommands) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    config.ensure_directories()?;
    let store = open_store(&config).await?;
    ensure_project(&store, &project_name_from_dir(project_dir)).await?;

    match command {
        BlockerCommands::List => {
            let pattern = blockers::analyze_blocker_pattern(&store, Some(PROJECT_ID)).await?;
            println!("Active blockers: {}", pattern.total_blockers);
            for (task_id, count) in pattern.blockers_by_task {
                println!("  task {task_id}: {count}");
            }
        }
        BlockerCommands::Resolve { id, resolution } => {
            let tracker = blockers::BlockerTracker::new(config.failure_threshold());
            blockers::resolve_blocker(&store, &tracker, id, resolution).await?;
            println!("Resolved blocker {id}");
        }
    }
    Ok(())
}

async fn cmd_quota(project_dir: &std::path::Path, verbose: bool, command: &QuotaCommands) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    config.ensure_directories()?;
    let store = open_store(&config).await?;

    match command {
        QuotaCommands::Check { provider } => {
            let status = quota::get_cached_status(&store, provider).await?;
            println!("Rate-limit warning: {:?}", status.rate_limit_warning);
            println!("Quota warning:      {:?}", status.quota_warning);
            if status.stale {
                println!("(cached data is stale)");
            }
            if status.should_delay {
                println!("Recommend delaying requests until rate limit resets.");
            }
        }
    }
    Ok(())
}

async fn cmd_detour(project_dir: &std::path::Path, verbose: bool, command: &DetourCommands) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    config.ensure_directories()?;
    let store = open_store(&config).await?;
    ensure_project(&store, &project_name_from_dir(project_dir)).await?;

    match command {
        DetourCommands::Request { phase_id, task_id, description, reason } => {
            let detour = detours::request_detour(&store, PROJECT_ID, phase_id, task_id, description, reason).await?;
            println!("Requested detour {} ({:?})", detour.id, detour.status);
        }
        DetourCommands::List => {
            let list = store.list_detours(PROJECT_ID).await?;
            for detour in list {
                println!("{}  {:?}  {}", detour.id, detour.status, detour.description);
            }
        }
        DetourCommands::Complete { id } => {
            let detour = detours::complete_detour(&store, id).await?;
            println!("Completed detour {} ({:?})", detour.id, detour.status);
        }
        DetourCommands::Cancel { id } => {
            let detour = detours::cancel_detour(&store, id).await?;
            println!("Cancelled detour {} ({:?})", detour.id, detour.status);
        }
    }
    Ok(())
}

async fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let state_dir = project_dir.join(".geoffrussy");
    let config_path = state_dir.join("geoffrussy.toml");

    match command.unwrap_or(ConfigCommands::Show) {
        ConfigCommands::Show => {
            let toml = config::GeoffrussyToml::load_or_default(&state_dir)?;
            println!("[project]");
            println!("  name = {:?}", toml.project.name);
            println!("[budget]");
            println!("  limit = {:?}", toml.budget.limit);
            println!("  warning_threshold = {}", toml.budget.warning_threshold);
            println!("[quota]");
            println!("  stale_after_secs = {}", toml.quota.stale_after_secs);
            println!("[engine]");
            println!("  failure_threshold = {}", toml.engine.failure_threshold);
        }
        ConfigCommands::Init => {
            if config_path.exists() {
                println!("geoffrussy.toml already exists at {}", config_path.display());
                return Ok(());
            }
            std::fs::create_dir_all(&state_dir)?;
            config::GeoffrussyToml::default().save(&config_path)?;
            println!("Created {}", config_path.display());
        }
    }
    Ok(())
}
