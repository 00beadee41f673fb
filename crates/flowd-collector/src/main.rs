//! flowd collector - Main entry point

use anyhow::Result;
use clap::Parser;
use flowd_collector::Config;
use flowd_common::logging::{init_logging, LogConfig, LogLevel};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "flowd-collector")]
#[command(author, version, about = "Persist flow records pushed by flowd producers")]
struct Cli {
    /// Number of producer endpoints (overrides NUM_OF_ENDPOINTS)
    #[arg(short = 'n', long)]
    endpoints: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = start().await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn start() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("flowd-collector")
        .filter_directives("sqlx=warn,zeromq=info")
        .build()
        .with_env()?;
    let _log_guard = init_logging(&log_config)?;

    let mut config = Config::load()?;
    if let Some(endpoints) = cli.endpoints {
        config.transport.endpoints = endpoints;
        config.validate()?;
    }

    info!(
        endpoints = config.transport.endpoints,
        base_address = %config.transport.base_address,
        base_port = config.transport.base_port,
        "Starting flowd collector"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    match flowd_collector::run(config, cancel).await {
        Ok(()) => {
            info!("Collector cancelled, shut down cleanly");
            Ok(())
        },
        Err(e) => {
            error!(error = %e, "Collector stopped");
            Err(e.into())
        },
    }
}

/// Cancel the run on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, cancelling"),
        _ = terminate => info!("Received terminate signal, cancelling"),
    }

    cancel.cancel();
}
