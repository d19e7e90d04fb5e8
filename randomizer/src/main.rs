//! Randomized blind attack-simulation CLI.
//!
//! Launches a random simulation technique without telling the operator which
//! one, so detection and incident response can be practiced blind. Every run
//! is recorded under the state directory (`.randomizer/` by default) and can
//! be revealed and cleaned up later.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use randomizer::cleanup::cleanup_run;
use randomizer::core::types::{RunMode, Tactic};
use randomizer::error::exit_code_for;
use randomizer::exit_codes;
use randomizer::io::account::AwsCliIdentity;
use randomizer::io::config::{RandomizerConfig, load_config};
use randomizer::io::init::{DEFAULT_STATE_DIR, InitOptions, StatePaths, init_state};
use randomizer::io::interrupt::CancelToken;
use randomizer::io::lock::LockManager;
use randomizer::io::run_store::RunStore;
use randomizer::io::tool::StratusTool;
use randomizer::listing::{list_runs, list_techniques};
use randomizer::logging;
use randomizer::render;
use randomizer::reveal::{reveal_run, suggestions_for};
use randomizer::run::{RunDeps, RunRequest, run_simulation};
use randomizer::status::collect_status;

#[derive(Parser)]
#[command(
    name = "randomizer",
    version,
    about = "Randomized blind attack simulation for detection and IR training"
)]
struct Cli {
    /// Directory holding config, run records, history and the run lock.
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the state directory and a default `config.toml`.
    Init {
        /// Overwrite an existing config with defaults.
        #[arg(short, long)]
        force: bool,
    },
    /// Launch a randomly selected technique without revealing it.
    Run(RunArgs),
    /// Show which technique a run used.
    Reveal { run_id: String },
    /// List recorded runs (default) or available techniques.
    List(ListArgs),
    /// Revert and clean up a run's technique.
    Cleanup { run_id: String },
    /// Show the lock, the simulation tool's state and recent runs.
    Status,
}

#[derive(Args)]
struct RunArgs {
    /// Expected cloud account id; the run aborts if credentials point elsewhere.
    #[arg(long)]
    account: String,
    #[arg(long)]
    region: String,
    /// train leaves artifacts for IR; validate cleans up right after detonation.
    #[arg(long, default_value_t = RunMode::Train)]
    mode: RunMode,
    /// Only pick techniques of this tactic (e.g. persistence).
    #[arg(long)]
    tactic: Option<Tactic>,
    /// Minimum seconds to wait between warmup and detonation.
    #[arg(long, default_value_t = 0)]
    dwell_min: u64,
    /// Maximum dwell in seconds (defaults to --dwell-min).
    #[arg(long)]
    dwell_max: Option<u64>,
    /// Allow recently used techniques.
    #[arg(long)]
    allow_repeat: bool,
    /// Number of recent techniques to avoid (default from config).
    #[arg(long)]
    avoid_last_n: Option<usize>,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long, conflicts_with = "techniques")]
    runs: bool,
    #[arg(long)]
    techniques: bool,
    #[arg(long)]
    tactic: Option<Tactic>,
    /// Maximum runs to show (default from config).
    #[arg(long)]
    limit: Option<usize>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let paths = StatePaths::new(&cli.state_dir);
    let code = match dispatch(&paths, cli.command) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Ok(store) = RunStore::open(&paths) {
                eprint!("{}", render::available_runs(&suggestions_for(&store, &err)));
            }
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn dispatch(paths: &StatePaths, command: Command) -> Result<()> {
    match command {
        Command::Init { force } => cmd_init(paths, force),
        Command::Run(args) => cmd_run(paths, &args),
        Command::Reveal { run_id } => cmd_reveal(paths, &run_id),
        Command::List(args) => cmd_list(paths, &args),
        Command::Cleanup { run_id } => cmd_cleanup(paths, &run_id),
        Command::Status => cmd_status(paths),
    }
}

fn cmd_init(paths: &StatePaths, force: bool) -> Result<()> {
    let paths = init_state(&paths.state_dir, &InitOptions { force })?;
    println!("Initialized {}", paths.state_dir.display());
    Ok(())
}

fn cmd_run(paths: &StatePaths, args: &RunArgs) -> Result<()> {
    let config = load_config(&paths.config_path)?;
    let cancel = CancelToken::install_ctrlc()?;
    let tool = StratusTool::new(config.tool.clone());
    let account = AwsCliIdentity::new(config.identity.clone()).with_region(&args.region);
    let locks = lock_manager(paths, &config);
    let deps = RunDeps {
        paths,
        config: &config,
        tool: &tool,
        account: &account,
        locks: &locks,
        cancel: &cancel,
    };
    let request = RunRequest {
        account: args.account.clone(),
        region: args.region.clone(),
        mode: args.mode,
        tactic: args.tactic,
        dwell_secs: args.dwell_min..=args.dwell_max.unwrap_or(args.dwell_min),
        avoid_recent: !args.allow_repeat,
        avoid_last_n: args.avoid_last_n,
    };
    let summary = run_simulation(&deps, &request, &mut rand::thread_rng(), |event| {
        print!("{}", render::run_event(event));
    })?;
    print!("{}", render::run_summary(&summary));
    Ok(())
}

fn cmd_reveal(paths: &StatePaths, run_id: &str) -> Result<()> {
    let store = RunStore::open(paths)?;
    let revelation = reveal_run(&store, run_id)?;
    print!("{}", render::revelation(&revelation));
    Ok(())
}

fn cmd_list(paths: &StatePaths, args: &ListArgs) -> Result<()> {
    let config = load_config(&paths.config_path)?;
    if args.techniques {
        let tool = StratusTool::new(config.tool.clone());
        let techniques = list_techniques(&tool, args.tactic)?;
        print!("{}", render::techniques_table(&techniques));
        return Ok(());
    }
    let store = RunStore::open(paths)?;
    let limit = args.limit.unwrap_or(config.listing.default_limit);
    let runs = list_runs(&store, args.tactic, limit)?;
    print!("{}", render::runs_table(&runs));
    Ok(())
}

fn cmd_cleanup(paths: &StatePaths, run_id: &str) -> Result<()> {
    let config = load_config(&paths.config_path)?;
    // Survive Ctrl-C so the interrupted step's outcome still gets recorded.
    let _cancel = CancelToken::install_ctrlc()?;
    let store = RunStore::open(paths)?;
    let tool = StratusTool::new(config.tool.clone());
    let locks = lock_manager(paths, &config);
    println!("Cleaning up run {run_id}...");
    let outcome = cleanup_run(paths, &store, &tool, &locks, run_id)?;
    print!("{}", render::cleanup_outcome(run_id, &outcome));
    Ok(())
}

fn cmd_status(paths: &StatePaths) -> Result<()> {
    let config = load_config(&paths.config_path)?;
    let store = RunStore::open(paths)?;
    let tool = StratusTool::new(config.tool.clone());
    let locks = lock_manager(paths, &config);
    let report = collect_status(&store, &locks, &tool)?;
    print!("{}", render::status_report(&report));
    Ok(())
}

fn lock_manager(paths: &StatePaths, config: &RandomizerConfig) -> LockManager {
    LockManager::new(&paths.lock_path, &config.lock)
}
