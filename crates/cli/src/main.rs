//! BlackRoad gateway CLI — the main entry point.
//!
//! Commands:
//! - `gateway`  — Start the HTTP gateway
//! - `status`   — Show configuration and provider status
//! - `journal`  — Inspect or verify the memory journal

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "blackroad",
    about = "BlackRoad — policy-enforcing LLM request gateway",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show configuration, providers, and journal status
    Status,

    /// Inspect or verify the memory journal
    Journal {
        #[command(subcommand)]
        command: JournalCommands,
    },
}

#[derive(Subcommand)]
enum JournalCommands {
    /// Verify the hash chain end to end
    Verify,

    /// Print the most recent entries, newest first
    Recent {
        /// Number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Gateway { port } => commands::gateway::run(port).await?,
        Commands::Status => commands::status::run()?,
        Commands::Journal { command } => match command {
            JournalCommands::Verify => commands::journal::verify()?,
            JournalCommands::Recent { limit } => commands::journal::recent(limit)?,
        },
    }

    Ok(())
}
