//! ReceiveHandler - runs business handlers for received records.
//!
//! Mirrors [`PublishHandler`](super::PublishHandler): an immediate path for
//! records the listener has just inserted and a leased retry path. The
//! handler is resolved from the record's `event_handler_name`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::BusConfig;
use crate::domain::foundation::RecordId;
use crate::domain::message::{MessageKind, MessageRecord, MessageTransferModel};
use crate::ports::{MessageSerializer, MessageSerializerExt, MessageStorage};

use super::attempt::AttemptRecorder;
use super::handle_outcome::{HandleOutcome, NoOpReason};
use super::handler_registry::HandlerRegistry;

pub struct ReceiveHandler {
    registry: Arc<HandlerRegistry>,
    serializer: Arc<dyn MessageSerializer>,
    recorder: AttemptRecorder,
}

impl ReceiveHandler {
    pub fn new(
        storage: Arc<dyn MessageStorage>,
        registry: Arc<HandlerRegistry>,
        serializer: Arc<dyn MessageSerializer>,
        config: &BusConfig,
    ) -> Self {
        Self {
            registry,
            serializer,
            recorder: AttemptRecorder::new(storage, MessageKind::Received, config),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Invokes the record's handler without leasing it.
    ///
    /// `message` supplies the inbound items; when absent they are decoded
    /// from the record.
    pub async fn handle(
        &self,
        record: MessageRecord,
        message: Option<MessageTransferModel>,
    ) -> HandleOutcome {
        let handler_name = record.event_handler_name.as_deref().unwrap_or_default();
        let Some(invoker) = self.registry.get(handler_name) else {
            tracing::warn!(
                msg_id = %record.msg_id,
                handler = handler_name,
                "No handler registered on this node"
            );
            return HandleOutcome::NoOp(NoOpReason::UnknownHandler);
        };

        let items = match message {
            Some(message) => message.items,
            None => match self.items_for(&record) {
                Ok(items) => items,
                Err(error) => return self.recorder.failed(&record, error).await,
            },
        };

        match invoker.invoke(&record.event_body, &items).await {
            Ok(()) => {
                tracing::debug!(msg_id = %record.msg_id, handler = handler_name, "Message handled");
                self.recorder.succeeded(&record).await
            }
            Err(e) => {
                tracing::warn!(
                    msg_id = %record.msg_id,
                    handler = handler_name,
                    retry_count = record.retry_count,
                    error = %e,
                    "Handler failed"
                );
                self.recorder.failed(&record, e.to_string()).await
            }
        }
    }

    /// Leases record `id` and invokes its handler.
    pub async fn locking_handle(&self, id: &RecordId) -> HandleOutcome {
        match self.recorder.acquire(id).await {
            Ok(record) => self.handle(record, None).await,
            Err(reason) => HandleOutcome::NoOp(reason),
        }
    }

    fn items_for(&self, record: &MessageRecord) -> Result<HashMap<String, String>, String> {
        if record.event_items.trim().is_empty() {
            return Ok(HashMap::new());
        }
        self.serializer
            .deserialize(&record.event_items)
            .map_err(|e| format!("undecodable event items: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryMessageStorage;
    use crate::adapters::serialization::JsonMessageSerializer;
    use crate::domain::foundation::{DomainError, Timestamp};
    use crate::domain::message::{DefaultNameRuler, Event, MessageStatus, NewMessage};
    use crate::ports::EventHandler;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Serialize, Deserialize)]
    struct OrderPlaced {
        order_id: u64,
    }

    impl Event for OrderPlaced {}

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl EventHandler<OrderPlaced> for Recorder {
        async fn handle(
            &self,
            _event: OrderPlaced,
            _items: &HashMap<String, String>,
        ) -> Result<(), DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(DomainError::handler_failed("downstream rejected"));
            }
            Ok(())
        }
    }

    struct Fixture {
        storage: Arc<InMemoryMessageStorage>,
        probe: Recorder,
        handler: ReceiveHandler,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryMessageStorage::new());
        let serializer: Arc<dyn MessageSerializer> = Arc::new(JsonMessageSerializer::new());
        let probe = Recorder::default();
        let mut registry = HandlerRegistry::new();
        registry
            .register::<OrderPlaced, _>(probe.clone(), &DefaultNameRuler, serializer.clone())
            .unwrap();
        let config = BusConfig::for_environment("test");
        let handler = ReceiveHandler::new(storage.clone(), Arc::new(registry), serializer, &config);
        Fixture {
            storage,
            probe,
            handler,
        }
    }

    async fn stored(storage: &InMemoryMessageStorage, handler: &str) -> MessageRecord {
        let message = NewMessage::scheduled("test", "OrderPlaced", "m1", r#"{"order_id":1}"#, "{}")
            .for_handler(handler);
        let id = storage.save_received(&message).await.unwrap();
        message.into_record(id)
    }

    async fn reload(storage: &InMemoryMessageStorage, id: &RecordId) -> MessageRecord {
        storage
            .find_by_id(MessageKind::Received, id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn handled_record_is_marked_succeeded() {
        let f = fixture();
        let record = stored(&f.storage, "Recorder").await;

        let outcome = f.handler.locking_handle(&record.id).await;

        assert_eq!(outcome, HandleOutcome::Completed);
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 1);
        let after = reload(&f.storage, &record.id).await;
        assert_eq!(after.status, MessageStatus::Succeeded);
        assert_eq!(after.retry_count, 1);
    }

    #[tokio::test]
    async fn handler_error_is_recorded_as_failed() {
        let f = fixture();
        f.probe.fail.store(true, Ordering::SeqCst);
        let record = stored(&f.storage, "Recorder").await;

        let outcome = f.handler.handle(record.clone(), None).await;

        assert!(!outcome.is_success());
        let after = reload(&f.storage, &record.id).await;
        assert_eq!(after.status, MessageStatus::Failed);
        assert_eq!(after.retry_count, 1);
    }

    #[tokio::test]
    async fn succeeded_record_is_not_handled_again() {
        let f = fixture();
        let record = stored(&f.storage, "Recorder").await;
        f.handler.locking_handle(&record.id).await;

        let outcome = f.handler.locking_handle(&record.id).await;

        assert_eq!(outcome, HandleOutcome::NoOp(NoOpReason::AlreadySucceeded));
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_handler_leaves_record_untouched() {
        let f = fixture();
        let record = stored(&f.storage, "SomeoneElse").await;

        let outcome = f.handler.handle(record.clone(), None).await;

        assert_eq!(outcome, HandleOutcome::NoOp(NoOpReason::UnknownHandler));
        let after = reload(&f.storage, &record.id).await;
        assert_eq!(after.status, MessageStatus::Scheduled);
        assert_eq!(after.retry_count, 0);
    }

    #[tokio::test]
    async fn elapsed_lease_can_be_taken_over() {
        let f = fixture();
        let mut record = stored(&f.storage, "Recorder").await;
        record.is_locking = true;
        record.lock_end = Some(Timestamp::now().minus_secs(1));
        f.storage.replace(MessageKind::Received, record.clone()).unwrap();

        let outcome = f.handler.locking_handle(&record.id).await;

        assert_eq!(outcome, HandleOutcome::Completed);
    }
}
