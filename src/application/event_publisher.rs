//! EventPublisher - business entry point of the outbox.
//!
//! `publish` writes the outbox record, inside the caller's transaction when
//! one is given, and returns as soon as the write is staged. Delivery runs
//! on a tracked background task:
//!
//! - no transaction: sent immediately;
//! - with a transaction: sent once it has concluded and the record is
//!   visible as committed. A rollback, or a transaction still open after
//!   `transaction_commit_timeout_secs`, sends nothing; a late commit is
//!   picked up by the retry coordinator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;

use crate::config::BusConfig;
use crate::domain::foundation::{new_msg_id, Timestamp};
use crate::domain::message::{item_keys, Event, MessageTransferModel, NameRuler, NewMessage};
use crate::ports::{
    MessageKey, MessageSerializer, MessageSerializerExt, MessageStorage, SerializationError,
    StorageError, TransactionContext,
};

use super::publish_handler::PublishHandler;

const COMMIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors surfaced to the publishing caller. Only the initial write can fail
/// synchronously; delivery failures show up as record status.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Serialization(#[from] SerializationError),

    #[error("failed to write outbox record: {0}")]
    Storage(#[from] StorageError),
}

pub struct EventPublisher {
    storage: Arc<dyn MessageStorage>,
    handler: Arc<PublishHandler>,
    serializer: Arc<dyn MessageSerializer>,
    ruler: Arc<dyn NameRuler>,
    environment: String,
    commit_timeout: Duration,
    dispatches: Mutex<JoinSet<()>>,
}

impl EventPublisher {
    pub fn new(
        storage: Arc<dyn MessageStorage>,
        handler: Arc<PublishHandler>,
        serializer: Arc<dyn MessageSerializer>,
        ruler: Arc<dyn NameRuler>,
        config: &BusConfig,
    ) -> Self {
        Self {
            storage,
            handler,
            serializer,
            ruler,
            environment: config.environment.clone(),
            commit_timeout: config.transaction_commit_timeout(),
            dispatches: Mutex::new(JoinSet::new()),
        }
    }

    /// Publishes `event` and returns its msg id.
    pub async fn publish<E: Event>(
        &self,
        event: &E,
        transaction: Option<Arc<dyn TransactionContext>>,
        items: Option<HashMap<String, String>>,
    ) -> Result<String, PublishError> {
        self.write(event, None, transaction, items).await
    }

    /// Publishes `event` for handling no earlier than `delay_at`.
    ///
    /// The envelope is sent right away; receivers hold it until it is due.
    pub async fn publish_delayed<E: Event>(
        &self,
        event: &E,
        delay_at: Timestamp,
        transaction: Option<Arc<dyn TransactionContext>>,
        items: Option<HashMap<String, String>>,
    ) -> Result<String, PublishError> {
        self.write(event, Some(delay_at), transaction, items).await
    }

    /// Waits for every dispatch started so far to finish.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut *self.lock_dispatches());
        while pending.join_next().await.is_some() {}
    }

    /// Number of dispatches not yet finished.
    pub fn in_flight(&self) -> usize {
        let mut dispatches = self.lock_dispatches();
        while dispatches.try_join_next().is_some() {}
        dispatches.len()
    }

    fn lock_dispatches(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.dispatches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn write<E: Event>(
        &self,
        event: &E,
        delay_at: Option<Timestamp>,
        transaction: Option<Arc<dyn TransactionContext>>,
        items: Option<HashMap<String, String>>,
    ) -> Result<String, PublishError> {
        let event_name = self.ruler.event_name(std::any::type_name::<E>(), E::NAME);
        let msg_id = new_msg_id();
        let now = Timestamp::now();

        let mut items = items.unwrap_or_default();
        items.insert(item_keys::MSG_ID.to_string(), msg_id.clone());
        items.insert(item_keys::EVENT_NAME.to_string(), event_name.clone());
        items.insert(item_keys::SEND_AT.to_string(), now.to_string());
        if let Some(at) = delay_at {
            items.insert(item_keys::DELAY_AT.to_string(), at.to_string());
        }

        let body = self.serializer.serialize(event)?;
        let encoded_items = self.serializer.serialize(&items)?;
        let mut message = NewMessage::scheduled(
            self.environment.clone(),
            event_name,
            msg_id.clone(),
            body,
            encoded_items,
        )
        .delayed_until(delay_at);
        message.create_time = now;

        let id = self
            .storage
            .save_published(&message, transaction.as_deref())
            .await?;
        let record = message.into_record(id);
        let envelope = MessageTransferModel::from_record(&record, items);

        tracing::debug!(
            msg_id = %record.msg_id,
            event = %record.event_name,
            transactional = transaction.is_some(),
            "Outbox record written"
        );

        let handler = self.handler.clone();
        let storage = self.storage.clone();
        let commit_timeout = self.commit_timeout;
        let mut dispatches = self.lock_dispatches();
        while dispatches.try_join_next().is_some() {}
        dispatches.spawn(async move {
            if let Some(tx) = transaction {
                let key = MessageKey::of(&record);
                if !await_commit(tx.as_ref(), storage.as_ref(), key, commit_timeout).await {
                    return;
                }
            }
            handler.handle(record, Some(envelope)).await;
        });

        Ok(msg_id)
    }
}

/// True once `tx` has concluded and the record is visible as committed.
async fn await_commit(
    tx: &dyn TransactionContext,
    storage: &dyn MessageStorage,
    key: MessageKey<'_>,
    timeout: Duration,
) -> bool {
    let msg_id = key.msg_id;
    let concluded = tokio::time::timeout(timeout, async {
        while !tx.is_done() {
            tokio::time::sleep(COMMIT_POLL_INTERVAL).await;
        }
    })
    .await;

    if concluded.is_err() {
        tracing::warn!(msg_id, "Transaction still open after timeout; leaving to retry");
        return false;
    }

    match storage.is_committed(key).await {
        Ok(true) => true,
        Ok(false) => {
            tracing::debug!(msg_id, "Transaction rolled back; nothing to send");
            false
        }
        Err(e) => {
            tracing::warn!(msg_id, error = %e, "Could not confirm commit; leaving to retry");
            false
        }
    }
}
