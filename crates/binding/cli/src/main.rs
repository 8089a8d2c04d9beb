//! bindctl - identity binding operator tool
//!
//! - Derive the canonical, PII-free DID for an issuer
//! - Validate and show the effective configuration
//! - Look an identity up on the mirror node
//! - Replay the identity topic and inspect derived bindings

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;

use binding_service::BindingConfig;
use commands::{canonical, config as check_config, lookup, replay};

/// bindctl CLI application
#[derive(Parser)]
#[command(name = "bindctl")]
#[command(about = "Identity binding operator tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BINDCTL_CONFIG")]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Print the canonical DID for an issuer
    Canonical {
        /// Issuer string (DID, key alias or contact address)
        issuer: String,

        /// Salt for hashed contact DIDs (defaults to the configured salt)
        #[arg(long)]
        salt: Option<String>,
    },

    /// Validate and show the effective configuration
    #[command(name = "check-config")]
    CheckConfig,

    /// Look an identity up on the mirror node
    Lookup {
        /// Issuer string
        identity: String,
    },

    /// Replay the identity topic from the mirror node
    Replay {
        /// Topic to replay (defaults to the configured topic)
        #[arg(short, long)]
        topic: Option<String>,

        /// History window in hours
        #[arg(long)]
        lookback_hours: Option<u64>,

        /// Show the derived binding for this issuer
        #[arg(short, long)]
        subject: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());
    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    // Load config
    let config = BindingConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Canonical { issuer, salt } => canonical::execute(
            &issuer,
            salt.as_deref().or(config.did_salt.as_deref()),
            cli.json,
        ),
        Commands::CheckConfig => check_config::execute(&config, cli.json),
        Commands::Lookup { identity } => lookup::execute(&config, &identity, cli.json).await,
        Commands::Replay {
            topic,
            lookback_hours,
            subject,
        } => {
            replay::execute(
                &config,
                replay::ReplayArgs {
                    topic,
                    lookback_hours,
                    subject,
                },
                cli.json,
            )
            .await
        }
    }
}
