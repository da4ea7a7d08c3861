use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// Log filter variable, e.g. `AGROSYNC_LOG=agrosync_core=debug`.
const LOG_ENV: &str = "AGROSYNC_LOG";

#[derive(Parser)]
#[command(name = "agrosync", version, about = "Agrosync local store and sync CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Local database management
    Store {
        #[command(subcommand)]
        action: commands::store::StoreAction,
    },
    /// Synchronization with the remote store
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Store { action } => commands::store::run(action),
        Commands::Sync { action } => commands::sync::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
