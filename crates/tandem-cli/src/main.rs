//! # tandem-cli
//!
//! Command-line interface for inspecting and administering Tandem sessions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tandem_core::Config;

mod commands;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
    /// Explicit config file, if one was given
    pub config_path: Option<PathBuf>,
}

/// Tandem - dual-store session persistence
#[derive(Parser)]
#[command(name = "tandem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file layered over the defaults
    #[arg(short, long, value_name = "FILE", env = "TANDEM_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty session and print its key
    Create,
    /// Show a stored session
    Show {
        /// Session key
        key: String,
        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set a field on a session
    Set {
        /// Session key
        key: String,
        /// Field name
        field: String,
        /// Field value as JSON (e.g. 42, "text", {"a": 1})
        value: String,
    },
    /// Delete a session from both stores
    Delete {
        /// Session key
        key: String,
    },
    /// Check whether a session record exists, expired or not
    Exists {
        /// Session key
        key: String,
    },
    /// Remove expired session records
    ClearExpired,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
    /// Diagnose store and cache connectivity
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });

    let ctx = AppContext {
        config,
        config_path: cli.config,
    };

    match cli.command {
        Commands::Create => commands::session::create(&ctx).await?,
        Commands::Show { key, json } => commands::session::show(&ctx, &key, json).await?,
        Commands::Set { key, field, value } => {
            commands::session::set(&ctx, &key, &field, &value).await?;
        }
        Commands::Delete { key } => commands::session::delete(&ctx, &key).await?,
        Commands::Exists { key } => commands::session::exists(&ctx, &key).await?,
        Commands::ClearExpired => commands::session::clear_expired(&ctx).await?,
        Commands::Config { action } => commands::config::handle(action, &ctx)?,
        Commands::Version => {
            println!("tandem {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Doctor => commands::doctor::run(&ctx).await?,
    }

    Ok(())
}
