//! card-ingestd - trivia ingestion daemon for the card engine

mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use card_ingest::generator::{OpenAiConfig, OpenAiGenerator};
use card_ingest::store::SqliteStore;
use card_ingest::{CategoryTable, ContentStore, DaemonState, IngestDaemon};

use config::{Args, Commands, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    match args.command() {
        Commands::Run => run(&args).await,
        Commands::Runs { limit } => print_runs(&args, limit).await,
        Commands::Categories => {
            let table = CategoryTable::new();
            println!("{}", serde_json::to_string_pretty(table.all())?);
            Ok(())
        }
    }
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "card_ingestd={level},card_ingest={level},warn",
            level = args.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

async fn run(args: &Args) -> anyhow::Result<()> {
    let config = args.ingest_config()?;

    info!("======================================");
    info!("  card-ingestd");
    info!("======================================");
    info!("Database: {}", args.database_path.display());
    info!("Provider: {} ({})", args.openai_base_url, args.openai_model);
    info!(
        "Cycle: every {}s, {} per category, {} concurrent",
        config.cycle_interval_secs,
        config.batch_size,
        config.max_in_flight()
    );
    info!("======================================");

    if !config.auto_start {
        warn!("Auto-start disabled; set CE_INGEST_AUTO_START=true to ingest");
        return Ok(());
    }

    let store = SqliteStore::open(&args.database_path)
        .with_context(|| format!("Failed to open {}", args.database_path.display()))?;

    let generator = OpenAiGenerator::new(
        OpenAiConfig::new(args.openai_api_key.clone())
            .with_base_url(args.openai_base_url.clone())
            .with_model(args.openai_model.clone())
            .with_timeout(config.request_timeout()),
    )?;

    let daemon = IngestDaemon::new(
        config,
        Arc::new(CategoryTable::new()),
        Arc::new(generator),
        Arc::new(store),
    );
    let mut runs = daemon.subscribe_runs();
    let mut state = daemon.subscribe_state();

    daemon.start().await?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut exit_code = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = runs.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = daemon.status().await;
                info!(
                    state = %status.state,
                    cycles = status.stats.cycles_completed,
                    fetched = status.stats.items_fetched,
                    added = status.stats.items_added,
                    skipped = status.stats.items_skipped,
                    errors = status.stats.errors,
                    known_questions = status.known_questions,
                    "Daemon status"
                );
            }
            stopped = state.wait_for(|s| *s == DaemonState::Stopped) => {
                drop(stopped);
                let status = daemon.status().await;
                error!(
                    last_error = status.stats.last_error.as_deref().unwrap_or("unknown"),
                    "Daemon stopped itself"
                );
                exit_code = 1;
                break;
            }
        }
    }

    daemon.stop().await;
    info!("Shutdown complete");

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

async fn print_runs(args: &Args, limit: usize) -> anyhow::Result<()> {
    let store = SqliteStore::open(&args.database_path)
        .with_context(|| format!("Failed to open {}", args.database_path.display()))?;
    let runs = store.recent_runs(limit).await?;
    println!("{}", serde_json::to_string_pretty(&runs)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
