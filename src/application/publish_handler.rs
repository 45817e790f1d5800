//! PublishHandler - turns a stored outbox record into a broker send.
//!
//! Two entry points share one routine:
//!
//! - [`PublishHandler::handle`] - immediate path, called right after the
//!   originating transaction commits. The record is fresh, so no lease.
//! - [`PublishHandler::locking_handle`] - retry path. Takes the lease first;
//!   losing the race is a no-op, not an error.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::BusConfig;
use crate::domain::foundation::RecordId;
use crate::domain::message::{MessageKind, MessageRecord, MessageTransferModel};
use crate::ports::{MessageSender, MessageSerializer, MessageSerializerExt, MessageStorage};

use super::attempt::AttemptRecorder;
use super::handle_outcome::HandleOutcome;

pub struct PublishHandler {
    sender: Arc<dyn MessageSender>,
    serializer: Arc<dyn MessageSerializer>,
    recorder: AttemptRecorder,
}

impl PublishHandler {
    pub fn new(
        storage: Arc<dyn MessageStorage>,
        sender: Arc<dyn MessageSender>,
        serializer: Arc<dyn MessageSerializer>,
        config: &BusConfig,
    ) -> Self {
        Self {
            sender,
            serializer,
            recorder: AttemptRecorder::new(storage, MessageKind::Published, config),
        }
    }

    /// Sends `record` without leasing it.
    ///
    /// `message` is the envelope built at publish time; when absent it is
    /// rebuilt from the record.
    pub async fn handle(
        &self,
        record: MessageRecord,
        message: Option<MessageTransferModel>,
    ) -> HandleOutcome {
        let message = match message {
            Some(message) => message,
            None => match self.envelope_for(&record) {
                Ok(message) => message,
                Err(error) => return self.recorder.failed(&record, error).await,
            },
        };

        match self.sender.send(&message).await {
            Ok(()) => {
                tracing::debug!(msg_id = %record.msg_id, event = %record.event_name, "Message sent");
                self.recorder.succeeded(&record).await
            }
            Err(e) => {
                tracing::warn!(
                    msg_id = %record.msg_id,
                    event = %record.event_name,
                    retry_count = record.retry_count,
                    error = %e,
                    "Send failed"
                );
                self.recorder.failed(&record, e.to_string()).await
            }
        }
    }

    /// Leases record `id` and sends it.
    pub async fn locking_handle(&self, id: &RecordId) -> HandleOutcome {
        match self.recorder.acquire(id).await {
            Ok(record) => self.handle(record, None).await,
            Err(reason) => HandleOutcome::NoOp(reason),
        }
    }

    fn envelope_for(&self, record: &MessageRecord) -> Result<MessageTransferModel, String> {
        let items: HashMap<String, String> = if record.event_items.trim().is_empty() {
            HashMap::new()
        } else {
            self.serializer
                .deserialize(&record.event_items)
                .map_err(|e| format!("undecodable event items: {e}"))?
        };
        Ok(MessageTransferModel::from_record(record, items))
    }
}
