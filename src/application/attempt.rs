//! Leasing and status recording shared by the publish and receive pipelines.

use std::sync::Arc;

use crate::config::BusConfig;
use crate::domain::foundation::{RecordId, Timestamp};
use crate::domain::message::{MessageKind, MessageRecord, MessageStatus, StatusUpdate};
use crate::ports::MessageStorage;

use super::handle_outcome::{FailedAttempt, HandleOutcome, NoOpReason};

pub(crate) struct AttemptRecorder {
    storage: Arc<dyn MessageStorage>,
    kind: MessageKind,
    lock_time_secs: u64,
    succeed_expire_hours: u64,
}

impl AttemptRecorder {
    pub(crate) fn new(storage: Arc<dyn MessageStorage>, kind: MessageKind, config: &BusConfig) -> Self {
        Self {
            storage,
            kind,
            lock_time_secs: config.lock_time_secs,
            succeed_expire_hours: config.succeed_expire_hours,
        }
    }

    /// Takes the lease on `id`, then loads the record it guards.
    pub(crate) async fn acquire(&self, id: &RecordId) -> Result<MessageRecord, NoOpReason> {
        let lock_end = Timestamp::now().plus_secs(self.lock_time_secs);
        match self.storage.try_lock(self.kind, id, lock_end).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(kind = %self.kind, record_id = %id, "Lease held elsewhere");
                return Err(NoOpReason::LockHeld);
            }
            Err(e) => {
                tracing::warn!(kind = %self.kind, record_id = %id, error = %e, "Storage unavailable while leasing");
                return Err(NoOpReason::StorageUnavailable);
            }
        }

        match self.storage.find_by_id(self.kind, id).await {
            Ok(Some(record)) if record.status == MessageStatus::Succeeded => {
                Err(NoOpReason::AlreadySucceeded)
            }
            Ok(Some(record)) => Ok(record),
            Ok(None) => {
                tracing::debug!(kind = %self.kind, record_id = %id, "Record not found");
                Err(NoOpReason::NotFound)
            }
            Err(e) => {
                tracing::warn!(kind = %self.kind, record_id = %id, error = %e, "Storage unavailable during lookup");
                Err(NoOpReason::StorageUnavailable)
            }
        }
    }

    pub(crate) async fn succeeded(&self, record: &MessageRecord) -> HandleOutcome {
        let retry_count = record.retry_count.saturating_add(1);
        let hours = i64::try_from(self.succeed_expire_hours).unwrap_or(i64::MAX);
        let expire_time = Timestamp::now().plus_hours(hours);
        let update = StatusUpdate::succeeded(retry_count, expire_time);

        match self.storage.update_status(self.kind, &record.id, update).await {
            Ok(()) => HandleOutcome::Completed,
            Err(e) => {
                tracing::error!(
                    kind = %self.kind,
                    record_id = %record.id,
                    msg_id = %record.msg_id,
                    error = %e,
                    "Delivered but could not record success; a retry pass may deliver again"
                );
                HandleOutcome::Unrecorded
            }
        }
    }

    pub(crate) async fn failed(&self, record: &MessageRecord, error: String) -> HandleOutcome {
        let retry_count = record.retry_count.saturating_add(1);
        let update = StatusUpdate::failed(retry_count);

        if let Err(e) = self.storage.update_status(self.kind, &record.id, update).await {
            tracing::error!(
                kind = %self.kind,
                record_id = %record.id,
                msg_id = %record.msg_id,
                error = %e,
                "Could not record failed attempt"
            );
        }
        HandleOutcome::Failed(FailedAttempt { retry_count, error })
    }
}
