//! Per-endpoint ingestion worker
//!
//! A worker owns one [`FlowSource`] and loops receive -> decode -> upsert,
//! finishing one message before waiting for the next. Receive failures are
//! transient and retried with capped exponential backoff; a malformed message,
//! a failed upsert, or an exhausted retry budget ends the worker with an
//! error. Cancellation is observed while waiting for a message, never in the
//! middle of an upsert.

use std::sync::Arc;
use std::time::Duration;

use flowd_common::types::FlowRecord;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoint::FlowSource;
use crate::error::{CollectorError, CollectorResult};
use crate::store::FlowSink;

/// Retry policy for receive failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivePolicy {
    /// Consecutive failures tolerated; reaching it ends the worker
    pub max_failures: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReceivePolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for ReceivePolicy {
    fn default() -> Self {
        crate::config::ReceiveConfig::default().policy()
    }
}

/// One receive-decode-persist loop bound to a single source
pub struct Worker<S, K> {
    index: usize,
    source: S,
    sink: Arc<K>,
    policy: ReceivePolicy,
    cancel: CancellationToken,
    processed: u64,
}

impl<S, K> Worker<S, K>
where
    S: FlowSource,
    K: FlowSink,
{
    pub fn new(
        index: usize,
        source: S,
        sink: Arc<K>,
        policy: ReceivePolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            index,
            source,
            sink,
            policy,
            cancel,
            processed: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Run until cancelled (`Ok`) or until a fatal failure (`Err`)
    pub async fn run(mut self) -> CollectorResult<()> {
        info!(worker = self.index, endpoint = %self.source.address(), "Worker started");

        let result = self.process().await;

        match &result {
            Ok(()) => info!(
                worker = self.index,
                processed = self.processed,
                "Worker stopped"
            ),
            Err(e) => warn!(
                worker = self.index,
                processed = self.processed,
                error = %e,
                "Worker failed"
            ),
        }

        result
    }

    async fn process(&mut self) -> CollectorResult<()> {
        while let Some(body) = self.next_message().await? {
            let record = FlowRecord::decode(&body).map_err(|source| CollectorError::Decode {
                worker: self.index,
                endpoint: self.source.address().to_string(),
                source,
            })?;

            self.sink
                .upsert(&record)
                .await
                .map_err(|source| CollectorError::Persist {
                    worker: self.index,
                    flow_id: record.id.clone(),
                    source,
                })?;

            self.processed += 1;
            debug!(worker = self.index, flow_id = %record.id, "Flow upserted");
        }

        Ok(())
    }

    /// Next message body, or `None` once cancelled
    async fn next_message(&mut self) -> CollectorResult<Option<Vec<u8>>> {
        let mut failures = 0u32;

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                received = self.source.recv() => received,
            };

            let error = match received {
                Ok(body) => return Ok(Some(body)),
                Err(e) => e,
            };

            failures += 1;
            if failures >= self.policy.max_failures {
                return Err(CollectorError::Receive {
                    worker: self.index,
                    endpoint: self.source.address().to_string(),
                    attempts: failures,
                    source: error,
                });
            }

            let delay = self.policy.backoff(failures);
            warn!(
                worker = self.index,
                endpoint = %self.source.address(),
                attempt = failures,
                retry_in = ?delay,
                error = %error,
                "Receive failed, retrying"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {},
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn policy() -> ReceivePolicy {
        ReceivePolicy {
            max_failures: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_default_policy_matches_config_defaults() {
        let policy = ReceivePolicy::default();
        assert_eq!(policy.max_failures, crate::config::DEFAULT_RECEIVE_MAX_FAILURES);
        assert_eq!(
            policy.initial_backoff,
            Duration::from_millis(crate::config::DEFAULT_RECEIVE_BACKOFF_MS)
        );
    }
}
