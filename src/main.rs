use clap::Parser;
use remote_backup::backup::client_config::{ClientConfig, DEFAULT_CONFIG_PATH};
use remote_backup::backup::connect::mounted::MountedConnector;
use remote_backup::backup::engine::Engine;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info};

/// Scheduled remote backups with compression and retention
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let args = Args::parse();

    let config = match ClientConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    };

    let connector = Arc::new(MountedConnector::new(&config.mount_root));
    let mut engine = match Engine::new(&config, connector) {
        Ok(engine) => engine,
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    };

    if let Err(e) = engine.check_connection().await {
        error!("Remote connection couldn't be established, exiting:\n{e}");
        exit(1);
    }

    tokio::select! {
        _ = async {
            engine.start().await;
            std::future::pending::<()>().await
        } => {}
        _ = shutdown_signal() => {}
    }

    engine.shutdown().await;
    info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
