use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use checkout_insights::{
    config::{Config, LogFormat},
    seed::{check_bounds, DEFAULT_DAYS, DEFAULT_SESSIONS},
    server::{AppState, McpServer},
    storage::SqliteStorage,
};

#[derive(Parser, Debug)]
#[command(name = "checkout-insights", version, about = "Checkout session insight engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the MCP server over stdio (default)
    Serve,
    /// Replace all sessions with synthetic demo data and recompute insights
    Seed {
        #[arg(long, default_value_t = DEFAULT_SESSIONS)]
        sessions: usize,
        #[arg(long, default_value_t = DEFAULT_DAYS)]
        days: u32,
    },
    /// Recompute insights from the stored sessions
    Recompute,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Checkout insights starting..."
    );

    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    let state = Arc::new(AppState::new(config, storage)?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let server = McpServer::new(state);
            info!("Server ready, waiting for requests on stdin...");

            if let Err(e) = server.run().await {
                error!(error = %e, "Server error");
                return Err(e.into());
            }
            info!("Server shutdown complete");
        }
        Command::Seed { sessions, days } => {
            check_bounds(sessions, days).map_err(anyhow::Error::msg)?;
            let summary = state.engine.seed_demo_data(sessions, days).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Recompute => {
            let created = state.engine.recompute().await?;
            println!("{}", serde_json::json!({ "insights": created }));
        }
    }

    Ok(())
}

/// Initialize tracing/logging on stderr; stdout carries protocol output.
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
