// Quotagate - Main Entry Point
//
// Admission gateway in front of the prompt-answering service:
// - CLI interface
// - Per-caller sliding-window rate limiting
// - Per-identity response quotas
// - Forwarding to the downstream answer endpoint

use anyhow::Result;
use clap::{Parser, Subcommand};
use quotagate::config::Config;
use quotagate::server;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Quotagate: rate limit and quota gateway for prompt answering
#[derive(Parser, Debug)]
#[command(name = "quotagate")]
#[command(version)]
#[command(about = "Rate limit and quota gateway for a prompt-answering service", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway
    Serve {
        /// Path to the config file (default: $QUOTAGATE_CONFIG or ./quotagate.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate configuration and print the effective settings
    CheckConfig {
        /// Path to the config file (default: $QUOTAGATE_CONFIG or ./quotagate.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Commands::Serve { config }) => {
            let config = load_config(config)?;
            init_tracing(&config, args.verbose)?;
            info!("Quotagate v{} starting...", env!("CARGO_PKG_VERSION"));
            server::serve(config).await?;
        }
        Some(Commands::CheckConfig { config }) => {
            let config = load_config(config)?;
            print!("{}", config.to_toml()?);
        }
        None => {
            println!("No command specified. Use \"quotagate --help\" for usage.");
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

/// Install the global subscriber in the configured format
///
/// `RUST_LOG` directives take precedence over the configured level.
fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().with_current_span(true).init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }

    Ok(())
}
