//! flowd collector
//!
//! Fans flow records in from many ZeroMQ PUSH producers and upserts them into
//! PostgreSQL.
//!
//! # Architecture
//!
//! - [`endpoint`]: one PULL connection per producer port (`base_port + i`)
//! - [`worker`]: receive -> decode -> upsert loop, one per connection
//! - [`store`]: the `flow_info` upsert and the shared connection pool
//! - [`supervisor`]: first failure or cancellation ends the run
//!
//! # Example
//!
//! ```no_run
//! use flowd_collector::{config::Config, run};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let cancel = CancellationToken::new();
//!     run(config, cancel).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod store;
pub mod supervisor;
pub mod worker;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use config::Config;
pub use error::{CollectorError, CollectorResult};

use endpoint::EndpointPool;
use store::FlowStore;
use supervisor::Supervisor;

/// Start the collector and block until it is cancelled or fails.
///
/// Startup is ordered so nothing is spawned before the store answers and every
/// endpoint is connected. Cancellation is honoured during startup too. The
/// pool is closed on every path after it was opened.
pub async fn run(config: Config, cancel: CancellationToken) -> CollectorResult<()> {
    let Some(store) = unless_cancelled(&cancel, async {
        FlowStore::connect(&config.database)
            .await
            .map_err(CollectorError::StoreUnavailable)
    })
    .await?
    else {
        return Ok(());
    };

    let result = serve(&config, &store, cancel).await;
    store.close().await;
    result
}

async fn serve(config: &Config, store: &FlowStore, cancel: CancellationToken) -> CollectorResult<()> {
    let startup = async {
        store.ping().await.map_err(CollectorError::StoreUnavailable)?;
        info!("Database reachable");
        open_endpoints(config).await
    };

    let Some(pool) = unless_cancelled(&cancel, startup).await? else {
        return Ok(());
    };

    Supervisor::new(
        pool.into_endpoints(),
        Arc::new(store.clone()),
        config.receive.policy(),
    )
    .run(cancel)
    .await
}

async fn open_endpoints(config: &Config) -> CollectorResult<EndpointPool> {
    EndpointPool::open(
        &config.transport.base_address,
        config.transport.base_port,
        config.transport.endpoints,
        config.transport.endpoint_options(),
    )
    .await
}

/// Drive one startup step; `None` if the run was cancelled first
async fn unless_cancelled<T, F>(cancel: &CancellationToken, step: F) -> CollectorResult<Option<T>>
where
    F: Future<Output = CollectorResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Cancelled during startup");
            Ok(None)
        },
        result = step => result.map(Some),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(base_port: u16) -> Config {
        Config::from_lookup(|key| match key {
            "POSTGRES_URL" => Some("postgresql://localhost/flowd".to_string()),
            "NUM_OF_ENDPOINTS" => Some("1".to_string()),
            "ZMQ_BASE_PORT" => Some(base_port.to_string()),
            "ZMQ_CONNECT_TIMEOUT_MS" => Some("3600000".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_endpoint_startup() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = config(port);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            unless_cancelled(&cancel, open_endpoints(&config)),
        )
        .await
        .expect("startup ignored cancellation");

        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_startup_step_result_passes_through() {
        let cancel = CancellationToken::new();

        let value = unless_cancelled(&cancel, async { Ok(7) }).await.unwrap();
        assert_eq!(value, Some(7));

        let err = unless_cancelled::<(), _>(&cancel, async {
            Err(CollectorError::config("bad"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CollectorError::Config(_)));
    }
}
