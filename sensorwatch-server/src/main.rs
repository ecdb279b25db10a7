// Sensorwatch Server - HTTP surface for the Sensorwatch pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Sensorwatch Server
//!
//! HTTP ingestion and query API, subscription feed and Prometheus metrics
//! for the Sensorwatch pipeline.
//!
//! ## Usage
//!
//! ```bash
//! # In-memory storage with simulated sensors
//! sensorwatch-server --simulate
//!
//! # SQLite storage, a TCP feed and a rules file
//! DATABASE_URL=sqlite://sensorwatch.db FEED_ADDR=127.0.0.1:1883 \
//!     sensorwatch-server --rules-file rules.toml --port 8000
//! ```

mod api;
mod error;
mod metrics;
mod rules_file;
mod simulate;

use api::AppState;
use clap::Parser;
use error::ServerError;
use sensorwatch::{
    AlertingConfig, MemoryStorage, Pipeline, PipelineConfig, SqliteStorage, Storage,
    TcpFeedSource,
};
use simulate::{Simulator, SimulatorConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Sensorwatch server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8000")]
    port: u16,

    /// Storage: `memory` or a SQLite URL such as `sqlite://sensorwatch.db`
    #[arg(long, env = "DATABASE_URL", default_value = "memory")]
    database_url: String,

    /// TCP address of a line-delimited JSON feed to subscribe to
    #[arg(long, env = "FEED_ADDR")]
    feed_addr: Option<String>,

    /// TOML rules file, re-read by POST /api/config/reload
    #[arg(short, long, env = "RULES_FILE")]
    rules_file: Option<PathBuf>,

    #[arg(long, env = "TEMPERATURE_MIN")]
    temperature_min: Option<f64>,

    #[arg(long, env = "TEMPERATURE_MAX")]
    temperature_max: Option<f64>,

    #[arg(long, env = "HUMIDITY_MIN")]
    humidity_min: Option<f64>,

    #[arg(long, env = "HUMIDITY_MAX")]
    humidity_max: Option<f64>,

    /// Accepted clock skew for reading timestamps, in seconds
    #[arg(long, default_value = "300")]
    clock_skew_secs: u64,

    /// Capacity of each per-sensor queue
    #[arg(long, default_value = "1024")]
    queue_capacity: usize,

    /// Generate readings for four simulated sensors
    #[arg(long)]
    simulate: bool,

    /// Interval between simulated reading cycles, in milliseconds
    #[arg(long, default_value = "2000")]
    simulate_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Sensorwatch Server v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "server failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), ServerError> {
    let alerting = match &args.rules_file {
        Some(path) => {
            info!(path = %path.display(), "loading rules file");
            rules_file::load(path)?
        }
        None => AlertingConfig::default(),
    };
    let alerting = rules_file::apply_overrides(
        alerting,
        (args.temperature_min, args.temperature_max),
        (args.humidity_min, args.humidity_max),
    );

    let storage = open_storage(&args.database_url).await?;

    let pipeline = Pipeline::builder(storage)
        .config(
            PipelineConfig::default()
                .with_line_capacity(args.queue_capacity)
                .with_clock_skew(Duration::from_secs(args.clock_skew_secs)),
        )
        .alerting(alerting)
        .start()
        .await?;
    let pipeline = Arc::new(pipeline);

    if let Some(addr) = &args.feed_addr {
        info!(addr = %addr, "subscribing to feed");
        pipeline.subscribe(Arc::new(TcpFeedSource::new(addr.clone())));
    }

    let simulator = args.simulate.then(|| {
        Simulator::new(
            Arc::clone(&pipeline),
            SimulatorConfig {
                interval: Duration::from_millis(args.simulate_interval_ms),
                ..Default::default()
            },
        )
        .spawn()
    });

    let state = Arc::new(AppState {
        pipeline: Arc::clone(&pipeline),
        rules_file: args.rules_file.clone(),
    });
    let app = api::router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // drain the pipeline even if the server errored
    pipeline.shutdown().await;
    if let Some(handle) = simulator {
        handle.abort();
    }
    served?;

    info!("Sensorwatch server stopped");
    Ok(())
}

async fn open_storage(url: &str) -> Result<Arc<dyn Storage>, ServerError> {
    if url == "memory" {
        info!("using in-memory storage");
        return Ok(Arc::new(MemoryStorage::new()));
    }
    info!(url = %url, "connecting to SQLite storage");
    Ok(Arc::new(SqliteStorage::connect(url).await?))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["sensorwatch-server"]);
        assert_eq!(args.queue_capacity, 1024);
        assert_eq!(args.clock_skew_secs, 300);
        assert!(!args.simulate);
    }

    #[tokio::test]
    async fn test_open_storage() {
        let memory = open_storage("memory").await.unwrap();
        assert_eq!(memory.name(), "memory");

        let sqlite = open_storage("sqlite::memory:").await.unwrap();
        assert_eq!(sqlite.name(), "sqlite");
        sqlite.close().await;
    }
}
