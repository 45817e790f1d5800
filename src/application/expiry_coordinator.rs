//! ExpiryCoordinator - periodic cleanup of expired `Succeeded` records.
//!
//! Purely a storage-size control: only terminal records past their expiry
//! are eligible, so cleanup never affects delivery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use crate::config::BusConfig;
use crate::domain::foundation::DomainError;
use crate::domain::message::MessageKind;
use crate::ports::MessageStorage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub published: u64,
    pub received: u64,
}

pub struct ExpiryCoordinator {
    storage: Arc<dyn MessageStorage>,
    interval: Duration,
}

impl ExpiryCoordinator {
    pub fn new(storage: Arc<dyn MessageStorage>, config: &BusConfig) -> Self {
        Self {
            storage,
            interval: config.expiry_interval(),
        }
    }

    /// Run the cleanup loop until shutdown signal is received.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DomainError> {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "Expiry coordinator started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Expiry coordinator stopped");
                        return Ok(());
                    }
                }

                _ = interval.tick() => {
                    let report = self.poll_once().await;
                    if report.published + report.received > 0 {
                        tracing::info!(
                            published = report.published,
                            received = report.received,
                            "Expired messages deleted"
                        );
                    }
                }
            }
        }
    }

    /// Run exactly one cleanup pass.
    pub async fn poll_once(&self) -> ExpiryReport {
        ExpiryReport {
            published: self.sweep(MessageKind::Published).await,
            received: self.sweep(MessageKind::Received).await,
        }
    }

    async fn sweep(&self, kind: MessageKind) -> u64 {
        match self.storage.delete_expired(kind).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Expiry sweep failed");
                0
            }
        }
    }
}
