//! Run-level error taxonomy for the collector

use thiserror::Error;

use crate::endpoint::TransportError;
use crate::store::StoreError;

pub type CollectorResult<T> = Result<T, CollectorError>;

/// Everything that can end a collector run.
///
/// Startup variants abort before any worker is spawned; worker variants carry
/// the worker index and, when one was decoded, the flow id.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The store could not be reached at startup
    #[error("Database unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// One endpoint of the pool could not be connected
    #[error("Failed to connect endpoint {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// A worker gave up on its endpoint after repeated receive failures
    #[error("Worker {worker} failed to receive from {endpoint} after {attempts} attempts: {source}")]
    Receive {
        worker: usize,
        endpoint: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// A message body was not a flow record
    #[error("Worker {worker} received a malformed message from {endpoint}: {source}")]
    Decode {
        worker: usize,
        endpoint: String,
        #[source]
        source: flowd_common::FlowdError,
    },

    /// The upsert for a decoded flow failed
    #[error("Worker {worker} failed to upsert flow '{flow_id}': {source}")]
    Persist {
        worker: usize,
        flow_id: String,
        #[source]
        source: StoreError,
    },

    /// A worker task panicked or was aborted before reporting
    #[error("Worker task ended abnormally: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl CollectorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// The worker index for failures raised inside a worker loop
    pub fn worker(&self) -> Option<usize> {
        match self {
            Self::Receive { worker, .. }
            | Self::Decode { worker, .. }
            | Self::Persist { worker, .. } => Some(*worker),
            _ => None,
        }
    }
}
