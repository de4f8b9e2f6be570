//! Main binary for the snapshot manager
//!
//! Serves the dashboard API and live sync feed:
//! - Retention-driven batch deletion with lock coordination
//! - Summary, activity, search and favorites queries
//! - WebSocket push of dashboard updates
//! - Prometheus metrics

use snapshot_manager::{config::SnapshotManagerConfig, manager::SnapshotManager, routes::create_router};

use anyhow::Context;
use axum::serve;
use clap::{Arg, Command};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let matches = create_cli().get_matches();
    let config = load_config(&matches)?;

    config.validate().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        anyhow::anyhow!(e)
    })?;

    info!("Starting snapshot manager");
    info!(
        "Configuration: Server {}:{}, provider {:?}, concurrency {}",
        config.server.host, config.server.port, config.provider.kind, config.deletion.concurrency
    );
    info!(
        "Retention: production {} days, non-production {} days",
        config.retention.production_days, config.retention.non_production_days
    );

    let cancellation_token = CancellationToken::new();

    let manager = Arc::new(SnapshotManager::new(config.clone()).await.map_err(|e| {
        error!("Failed to initialize snapshot manager: {}", e);
        e
    })?);

    let publisher_task = manager.start();

    let app = create_router(manager.clone());

    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse()
            .with_context(|| format!("Invalid host address: {}", config.server.host))?,
        config.server.port,
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", addr))?;

    info!("Snapshot manager started successfully on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Metrics: http://{}/metrics", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    // Start server with graceful shutdown
    let server_task = tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            let server = serve(listener, app);

            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!("Server error: {}", e);
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Server shutdown requested");
                }
            }
        }
    });

    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    cancellation_token.cancel();
    manager.shutdown();

    if let Err(e) = server_task.await {
        error!("Server task error during shutdown: {}", e);
    }

    if let Err(e) = publisher_task.await {
        warn!("Live sync publisher ended abnormally: {}", e);
    }

    info!("Snapshot manager stopped gracefully");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "snapshot_manager=info,tower_http=info".into());

    // A second initialization in tests is harmless
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Create CLI argument parser
fn create_cli() -> Command {
    Command::new("snapshot-manager-server")
        .version("1.0.0")
        .about("Snapshot lifecycle manager - retention, lock coordination and live dashboard sync")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Server host address"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server port"),
        )
        .arg(
            Arg::new("provider")
                .long("provider")
                .value_name("KIND")
                .help("Cloud provider (in_memory, azure_cli)"),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .value_name("NUM")
                .help("Maximum concurrent provider deletions"),
        )
}

/// Load configuration from file and environment, then apply CLI overrides
fn load_config(matches: &clap::ArgMatches) -> anyhow::Result<SnapshotManagerConfig> {
    let mut config = if let Some(config_file) = matches.get_one::<String>("config") {
        info!("Loading configuration from file: {}", config_file);
        std::env::set_var("SNAPSHOT_MANAGER_CONFIG_FILE", config_file);
        SnapshotManagerConfig::from_env().context("Failed to load configuration from file")?
    } else {
        SnapshotManagerConfig::from_env().unwrap_or_else(|e| {
            warn!(
                "Failed to load configuration from environment: {}, using defaults",
                e
            );
            SnapshotManagerConfig::default()
        })
    };

    if let Some(host) = matches.get_one::<String>("host") {
        config.server.host = host.clone();
    }

    if let Some(port_str) = matches.get_one::<String>("port") {
        config.server.port = port_str
            .parse()
            .with_context(|| format!("Invalid port number '{}'", port_str))?;
    }

    if let Some(kind) = matches.get_one::<String>("provider") {
        config.provider.kind = kind.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    }

    if let Some(concurrency_str) = matches.get_one::<String>("concurrency") {
        config.deletion.concurrency = concurrency_str
            .parse()
            .with_context(|| format!("Invalid concurrency '{}'", concurrency_str))?;
    }

    Ok(config)
}

/// Wait for shutdown signals
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapshot_manager::config::ProviderKind;

    #[test]
    fn test_create_cli() {
        let matches = create_cli()
            .try_get_matches_from(vec!["snapshot-manager-server", "--port", "9090"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("port"), Some(&"9090".to_string()));
    }

    #[test]
    fn test_load_config_with_overrides() {
        let matches = create_cli().get_matches_from(vec![
            "snapshot-manager-server",
            "--host",
            "127.0.0.1",
            "--port",
            "9999",
            "--provider",
            "azure-cli",
            "--concurrency",
            "2",
        ]);

        let config = load_config(&matches).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.provider.kind, ProviderKind::AzureCli);
        assert_eq!(config.deletion.concurrency, 2);
    }

    #[test]
    fn test_invalid_overrides_are_rejected() {
        let matches = create_cli().get_matches_from(vec!["snapshot-manager-server", "--port", "invalid"]);
        assert!(load_config(&matches).is_err());

        let matches =
            create_cli().get_matches_from(vec!["snapshot-manager-server", "--provider", "gcp"]);
        assert!(load_config(&matches).is_err());
    }

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        init_tracing();
    }
}
