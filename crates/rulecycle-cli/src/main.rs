mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::memory::MemorySubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rulecycle",
    about = "Periodically pick and run one eligible, weighted, never-repeated action",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: nearest rulecycle.yaml, then ~/.config/rulecycle/)
    #[arg(long, global = true, env = "RULECYCLE_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter rulecycle.yaml if none exists
    Init,

    /// Run the scheduler loop until Ctrl-C / SIGTERM
    Run {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,

        /// Seed rule selection for a reproducible run
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Validate the config for mistakes
    Check,

    /// List configured rules
    Rules,

    /// Probe the host once and print the snapshot
    Observe,

    /// Show which rules would be eligible right now, with probabilities
    Eligible,

    /// Show audit records
    Audit {
        /// Only the most recent N records
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Inspect or reset persisted exclusion memory
    Memory {
        #[command(subcommand)]
        subcommand: MemorySubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = root::resolve_config(cli.config.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&config),
        Commands::Run { cycles, seed } => cmd::run::run(&config, cycles, seed, cli.json),
        Commands::Check => cmd::check::run(&config, cli.json),
        Commands::Rules => cmd::rules::run(&config, cli.json),
        Commands::Observe => cmd::observe::run(&config, cli.json),
        Commands::Eligible => cmd::observe::eligible(&config, cli.json),
        Commands::Audit { limit } => cmd::audit::run(&config, limit, cli.json),
        Commands::Memory { subcommand } => cmd::memory::run(&config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
