//! RetryCoordinator - background poller replaying due records.
//!
//! Every node runs one. Each pass queries retry candidates for both sides of
//! the bus and drives them through the leased retry path; lease contention
//! between nodes is expected and counted as skipped.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `retry_interval_secs` | 60 | Time between passes |
//! | `retry_limit_count` | 100 | Max candidates per side per pass |
//! | `start_retry_after_secs` | 300 | Minimum record age |
//! | `retry_failed_max` | 60 | Attempt ceiling |
//!
//! ## Graceful Shutdown
//!
//! The loop stops taking new passes once the shutdown signal is received.
//! A pass already running finishes its current record.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use crate::config::BusConfig;
use crate::domain::foundation::DomainError;
use crate::domain::message::MessageKind;
use crate::ports::{MessageStorage, RetryQuery};

use super::handle_outcome::HandleOutcome;
use super::publish_handler::PublishHandler;
use super::receive_handler::ReceiveHandler;

/// Per-side results of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryTally {
    pub candidates: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RetryTally {
    fn record(&mut self, outcome: &HandleOutcome) {
        match outcome {
            HandleOutcome::Completed | HandleOutcome::Unrecorded => self.completed += 1,
            HandleOutcome::Failed(_) => self.failed += 1,
            HandleOutcome::NoOp(_) => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub published: RetryTally,
    pub received: RetryTally,
}

pub struct RetryCoordinator {
    storage: Arc<dyn MessageStorage>,
    publish: Arc<PublishHandler>,
    receive: Arc<ReceiveHandler>,
    query: RetryQuery,
    interval: Duration,
}

impl RetryCoordinator {
    pub fn new(
        storage: Arc<dyn MessageStorage>,
        publish: Arc<PublishHandler>,
        receive: Arc<ReceiveHandler>,
        config: &BusConfig,
    ) -> Self {
        Self {
            storage,
            publish,
            receive,
            query: RetryQuery {
                batch_size: config.retry_limit_count,
                older_than_secs: config.start_retry_after_secs,
                max_retry_count: config.retry_failed_max,
                environment: config.environment.clone(),
            },
            interval: config.retry_interval(),
        }
    }

    /// Run the retry loop until shutdown signal is received.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DomainError> {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tracing::info!(
            environment = %self.query.environment,
            interval_secs = self.interval.as_secs(),
            "Retry coordinator started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Retry coordinator stopped");
                        return Ok(());
                    }
                }

                _ = interval.tick() => {
                    let report = self.poll_once().await;
                    if report.published.candidates + report.received.candidates > 0 {
                        tracing::info!(
                            published = report.published.candidates,
                            published_completed = report.published.completed,
                            received = report.received.candidates,
                            received_completed = report.received.completed,
                            "Retry pass finished"
                        );
                    }
                }
            }
        }
    }

    /// Run exactly one pass over both sides.
    pub async fn poll_once(&self) -> RetryReport {
        RetryReport {
            published: self.pass(MessageKind::Published).await,
            received: self.pass(MessageKind::Received).await,
        }
    }

    async fn pass(&self, kind: MessageKind) -> RetryTally {
        let mut tally = RetryTally::default();
        let candidates = match self.storage.retry_candidates(kind, &self.query).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Retry candidate query failed");
                return tally;
            }
        };

        tally.candidates = candidates.len();
        for record in candidates {
            let outcome = match kind {
                MessageKind::Published => self.publish.locking_handle(&record.id).await,
                MessageKind::Received => self.receive.locking_handle(&record.id).await,
            };
            tally.record(&outcome);
        }
        tally
    }
}
