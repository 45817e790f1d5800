//! DefaultMessageListener - receive entry point invoked by the subscriber.
//!
//! For each envelope:
//!
//! 1. Drop it if it belongs to another environment or event (logged).
//! 2. Look up the received copy by (environment, event, msg id, handler).
//! 3. `Succeeded` copy: replay, nothing to do.
//! 4. No copy: insert one already leased and handle it immediately, or, for
//!    a delayed envelope, insert it unleased and handle it once due.
//! 5. Existing unfinished copy: take the retry path.
//!
//! Only a failure to durably record the envelope is reported back, so the
//! subscriber leaves it unacknowledged and the broker redelivers.
//!
//! Delayed handling runs on tasks owned by [`DelayedHandling`]. Closing it
//! cancels the waits still pending; those records stay `Scheduled` and the
//! retry coordinator handles them once due.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::BusConfig;
use crate::domain::foundation::{RecordId, Timestamp};
use crate::domain::message::{
    EventHandlerDescriptor, MessageStatus, MessageTransferModel, NewMessage,
};
use crate::ports::{
    MessageKey, MessageListener, MessageSerializer, MessageSerializerExt, MessageStorage,
    ReceiveError, StorageError,
};

use super::receive_handler::ReceiveHandler;

/// Owner of every pending delayed-handling task of one bus.
pub struct DelayedHandling {
    tasks: Mutex<JoinSet<()>>,
    stop: watch::Sender<bool>,
}

impl DelayedHandling {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            stop: watch::channel(false).0,
        }
    }

    /// Handles record `id` after `delay`, unless closed first.
    ///
    /// Returns false once closed; the record is then left to the retry
    /// coordinator.
    pub fn schedule(&self, handler: Arc<ReceiveHandler>, id: RecordId, delay: Duration) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut stop = self.stop.subscribe();
        let mut tasks = self.lock_tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let due = tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = stop.wait_for(|stopped| *stopped) => false,
            };
            if due {
                handler.locking_handle(&id).await;
            } else {
                tracing::debug!(record_id = %id, "Delayed handling cancelled; left for retry");
            }
        });
        true
    }

    /// Number of delayed handlings not yet finished.
    pub fn pending(&self) -> usize {
        let mut tasks = self.lock_tasks();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        *self.stop.borrow()
    }

    /// Cancels pending waits and waits for handlings already running.
    pub async fn close(&self) {
        self.stop.send_replace(true);
        let mut pending = std::mem::take(&mut *self.lock_tasks());
        while pending.join_next().await.is_some() {}
    }

    fn lock_tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DelayedHandling {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DefaultMessageListener {
    descriptor: EventHandlerDescriptor,
    storage: Arc<dyn MessageStorage>,
    handler: Arc<ReceiveHandler>,
    serializer: Arc<dyn MessageSerializer>,
    delayed: Arc<DelayedHandling>,
    environment: String,
    lock_time_secs: u64,
}

impl DefaultMessageListener {
    pub fn new(
        descriptor: EventHandlerDescriptor,
        storage: Arc<dyn MessageStorage>,
        handler: Arc<ReceiveHandler>,
        serializer: Arc<dyn MessageSerializer>,
        delayed: Arc<DelayedHandling>,
        config: &BusConfig,
    ) -> Self {
        Self {
            descriptor,
            storage,
            handler,
            serializer,
            delayed,
            environment: config.environment.clone(),
            lock_time_secs: config.lock_time_secs,
        }
    }

    fn accepts(&self, message: &MessageTransferModel) -> bool {
        if message.environment != self.environment {
            tracing::error!(
                msg_id = %message.msg_id,
                expected = %self.environment,
                actual = %message.environment,
                handler = %self.descriptor.event_handler_name,
                "Dropping envelope from another environment"
            );
            return false;
        }
        if message.event_name != self.descriptor.event_name {
            tracing::error!(
                msg_id = %message.msg_id,
                expected = %self.descriptor.event_name,
                actual = %message.event_name,
                handler = %self.descriptor.event_handler_name,
                "Dropping envelope for another event"
            );
            return false;
        }
        true
    }

    async fn insert_and_handle(&self, message: MessageTransferModel) -> Result<(), ReceiveError> {
        let items = self.serializer.serialize(&message.items)?;
        let mut record = NewMessage::scheduled(
            self.environment.clone(),
            message.event_name.clone(),
            message.msg_id.clone(),
            message.msg_body.clone(),
            items,
        )
        .for_handler(self.descriptor.event_handler_name.clone())
        .delayed_until(message.delay_at);

        let delayed = message.is_delayed();
        if !delayed {
            record = record.leased_until(Timestamp::now().plus_secs(self.lock_time_secs));
        }

        let id = match self.storage.save_received(&record).await {
            Ok(id) => id,
            Err(StorageError::Duplicate { .. }) => {
                tracing::debug!(
                    msg_id = %message.msg_id,
                    handler = %self.descriptor.event_handler_name,
                    "Concurrent delivery already recorded this message"
                );
                return self.retry_existing(&message).await;
            }
            Err(e) => return Err(e.into()),
        };

        let stored = record.into_record(id);
        if delayed {
            let delay = message
                .delay_at
                .map(|at| at.remaining())
                .unwrap_or_default();
            let scheduled = self
                .delayed
                .schedule(self.handler.clone(), stored.id.clone(), delay);
            tracing::debug!(
                msg_id = %message.msg_id,
                handler = %self.descriptor.event_handler_name,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                scheduled,
                "Delayed envelope recorded"
            );
            return Ok(());
        }

        self.handler.handle(stored, Some(message)).await;
        Ok(())
    }

    async fn retry_existing(&self, message: &MessageTransferModel) -> Result<(), ReceiveError> {
        let existing = self
            .storage
            .find_received_by_msg_id(message_key(message), &self.descriptor)
            .await?;
        if let Some(record) = existing {
            if record.status != MessageStatus::Succeeded {
                self.handler.locking_handle(&record.id).await;
            }
        }
        Ok(())
    }
}

fn message_key(message: &MessageTransferModel) -> MessageKey<'_> {
    MessageKey::new(&message.environment, &message.event_name, &message.msg_id)
}

#[async_trait]
impl MessageListener for DefaultMessageListener {
    fn descriptor(&self) -> &EventHandlerDescriptor {
        &self.descriptor
    }

    async fn on_receive(&self, message: MessageTransferModel) -> Result<(), ReceiveError> {
        if !self.accepts(&message) {
            return Ok(());
        }

        tracing::debug!(
            msg_id = %message.msg_id,
            event = %message.event_name,
            handler = %self.descriptor.event_handler_name,
            "Message received"
        );

        let existing = self
            .storage
            .find_received_by_msg_id(message_key(&message), &self.descriptor)
            .await?;

        match existing {
            Some(record) if record.status == MessageStatus::Succeeded => {
                tracing::debug!(
                    msg_id = %message.msg_id,
                    handler = %self.descriptor.event_handler_name,
                    "Already handled, ignoring replay"
                );
                Ok(())
            }
            Some(record) => {
                if !message.is_delayed() {
                    self.handler.locking_handle(&record.id).await;
                }
                Ok(())
            }
            None => self.insert_and_handle(message).await,
        }
    }
}
