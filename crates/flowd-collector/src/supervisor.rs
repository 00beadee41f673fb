//! Fan-in of worker outcomes and external cancellation
//!
//! The supervisor spawns one [`Worker`] per source into a `JoinSet` and waits
//! for whichever comes first: cancellation of the run, or a worker finishing
//! with an error. Cancellation wins when both are ready. Either way the
//! remaining workers are cancelled and aborted, and their sources are dropped
//! before `run` returns.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::endpoint::FlowSource;
use crate::error::{CollectorError, CollectorResult};
use crate::store::FlowSink;
use crate::worker::{ReceivePolicy, Worker};

pub struct Supervisor<S, K> {
    sources: Vec<S>,
    sink: Arc<K>,
    policy: ReceivePolicy,
}

impl<S, K> Supervisor<S, K>
where
    S: FlowSource,
    K: FlowSink,
{
    pub fn new(sources: Vec<S>, sink: Arc<K>, policy: ReceivePolicy) -> Self {
        Self {
            sources,
            sink,
            policy,
        }
    }

    /// Run every worker until `cancel` fires or one of them fails.
    ///
    /// Returns `Ok(())` for a cancelled run and the first worker failure
    /// otherwise.
    pub async fn run(self, cancel: CancellationToken) -> CollectorResult<()> {
        if self.sources.is_empty() {
            return Err(CollectorError::config("No endpoints to supervise"));
        }

        let worker_cancel = cancel.child_token();
        let mut workers = JoinSet::new();
        let count = self.sources.len();

        for (index, source) in self.sources.into_iter().enumerate() {
            let worker = Worker::new(
                index,
                source,
                Arc::clone(&self.sink),
                self.policy,
                worker_cancel.clone(),
            );
            workers.spawn(worker.run());
        }

        info!(workers = count, "Supervisor started");

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Run cancelled");
                    break Ok(());
                }
                joined = workers.join_next() => match joined {
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(e))) => break Err(e),
                    Some(Err(e)) => break Err(CollectorError::Worker(e)),
                    None => break Ok(()),
                },
            }
        };

        if let Err(ref e) = outcome {
            error!(error = %e, worker = ?e.worker(), "Worker failure ends the run");
        }

        worker_cancel.cancel();
        workers.shutdown().await;
        info!(workers = count, "Workers stopped, endpoints released");

        outcome
    }
}
