//! meshsync — mesh configuration synchronization CLI.
//!
//! # Usage
//!
//! ```text
//! meshsync apply <files...> [--json]
//! meshsync collections [--json]
//! meshsync list <type> [--namespace <ns>]
//! meshsync get <type> <namespace/name>
//! meshsync daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    apply::ApplyArgs,
    collections::CollectionsArgs,
    daemon::DaemonCommand,
    query::{GetArgs, ListArgs},
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "meshsync",
    version,
    about = "Apply and inspect service-mesh configuration change batches",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply batch files to a fresh in-process pipeline and report the outcome.
    Apply(ApplyArgs),

    /// Show the collections the engine accepts.
    Collections(CollectionsArgs),

    /// List records of one type held by the running daemon.
    List(ListArgs),

    /// Fetch one record from the running daemon.
    Get(GetArgs),

    /// Manage the meshsync background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Apply(args) => args.run(),
        Commands::Collections(args) => args.run(),
        Commands::List(args) => args.run(),
        Commands::Get(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
