//! seriallog Binary Entry Point
//!
//! `seriallog run` ingests from serial devices until interrupted.
//! `seriallog query` prints stored lines, newest first.
//! Core functionality is provided by the `seriallog` library crate.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use seriallog::{
    IngestRegistry, LogQuery, LogRecord, LogStore, SerialTransport,
    config::{AppConfig, parse_duration},
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// seriallog - Serial Line Logger
#[derive(Parser, Debug)]
#[command(name = "seriallog", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "SERIALLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Database path or ":memory:" (overrides config file)
    #[arg(long, env = "SERIALLOG_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest lines from serial devices until interrupted
    Run {
        /// Serial devices (overrides config file)
        devices: Vec<String>,
    },
    /// Print stored lines, newest first
    Query {
        /// Start of the window as a duration before now, e.g. "15m" or "2h"
        #[arg(long, value_parser = parse_duration)]
        since: Option<Duration>,

        /// End of the window (RFC 3339, default: now)
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        /// Only show lines from this device
        #[arg(long)]
        device: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,seriallog=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    if let Command::Run { devices } = &cli.command {
        if !devices.is_empty() {
            config.devices = devices.clone();
        }
    }
    config.validate()?;

    // A store that cannot be opened is fatal. Queries never create one.
    let store = match cli.command {
        Command::Run { .. } => LogStore::open(&config.database.path).await?,
        Command::Query { .. } => LogStore::open_existing(&config.database.path).await?,
    };

    match cli.command {
        Command::Run { .. } => run(config, store).await,
        Command::Query {
            since,
            until,
            device,
            format,
        } => {
            let mut query = LogQuery::window_before(
                until.unwrap_or_else(Utc::now),
                since.unwrap_or(config.query.default_window),
            );
            if let Some(device) = device {
                query = query.with_device(device);
            }
            let result = query_logs(&store, query, format).await;
            store.close().await;
            result
        }
    }
}

/// Spawn one supervisor per device and wait for a termination signal.
async fn run(config: AppConfig, store: LogStore) -> Result<(), Box<dyn std::error::Error>> {
    if config.devices.is_empty() {
        store.close().await;
        return Err("please provide list of serial ports".into());
    }

    let mut registry = IngestRegistry::new(SerialTransport::new(), store.clone());
    for device in &config.devices {
        registry.spawn(device.as_str())?;
    }

    tracing::info!(
        "Logging {} device(s) to {}",
        registry.device_count(),
        store.location()
    );
    tracing::info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;

    tracing::info!("Shutting down supervisors...");
    if let Err(e) = registry.shutdown().await {
        tracing::error!("Failed to shutdown supervisors: {}", e);
    }

    tracing::info!("Closing store...");
    store.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Stream query results to stdout; Ctrl+C cancels the query.
async fn query_logs(
    store: &LogStore,
    query: LogQuery,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let mut count = 0usize;
    let mut stream = store.query(query, cancel);
    let outcome = loop {
        match stream.next().await {
            Some(Ok(record)) => {
                print_record(&record, format)?;
                count += 1;
            }
            Some(Err(e)) if e.is_cancelled() => {
                tracing::warn!(count, "Query cancelled");
                break Ok(());
            }
            Some(Err(e)) => break Err(e.into()),
            None => {
                tracing::debug!(count, "Query complete");
                break Ok(());
            }
        }
    };

    watcher.abort();
    outcome
}

fn print_record(record: &LogRecord, format: OutputFormat) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Text => {
            let ts = record
                .datetime()
                .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
                .unwrap_or_else(|| record.ts.to_string());
            println!("{} {} {}", ts, record.device, record.message);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(record)?),
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
