//! Continuum CLI: the main entry point.
//!
//! Commands:
//! - `run`: Run a turn (single message or interactive)
//! - `tools`: Show which tools a query would expose
//! - `check`: Validate config and tool catalog
//! - `config`: Show, locate, or initialize the config file

use clap::{Parser, Subcommand};

mod commands;
mod dispatcher;

#[derive(Parser)]
#[command(
    name = "continuum",
    about = "Continuum — context budget & continuation engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a user turn through the continuation loop
    Run {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// System prompt for every call of the turn
        #[arg(short, long, default_value = "")]
        system: String,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Wait for complete responses instead of streaming
        #[arg(long)]
        no_stream: bool,
    },

    /// Show the tools a query would select, with token estimates
    Tools {
        /// The user message to filter for
        query: String,
    },

    /// Validate configuration and the tool catalog
    Check,

    /// Configuration file management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run {
            message,
            system,
            model,
            no_stream,
        } => commands::run::run(message, system, model, no_stream).await?,
        Commands::Tools { query } => commands::tools::run(&query)?,
        Commands::Check => commands::check::run()?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Init => commands::config_cmd::init()?,
        },
    }

    Ok(())
}
