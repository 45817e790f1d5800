//! MessageQueries - operational read side of the bus.
//!
//! Backs the dashboard API: paged search with status counts, and the manual
//! "retry" action, which runs the leased retry path on demand.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::foundation::RecordId;
use crate::domain::message::{MessageKind, MessageRecord, MessageStatus};
use crate::ports::{MessageStorage, SearchFilter, StorageError};

use super::handle_outcome::HandleOutcome;
use super::publish_handler::PublishHandler;
use super::receive_handler::ReceiveHandler;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 500;

/// Search criteria as entered by an operator. Blank names mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageQuery {
    pub event_name: Option<String>,
    pub event_handler_name: Option<String>,
    /// `None` selects the first status that has any records.
    pub status: MessageStatus,
    /// 1-based.
    pub page_index: usize,
    pub page_size: usize,
}

/// One page of results together with the per-status totals.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub status_counts: BTreeMap<String, u64>,
    /// The status actually searched.
    pub status: MessageStatus,
    pub page_index: usize,
    pub page_size: usize,
    pub total_page: usize,
    pub messages: Vec<MessageRecord>,
}

pub struct MessageQueries {
    storage: Arc<dyn MessageStorage>,
    publish: Arc<PublishHandler>,
    receive: Arc<ReceiveHandler>,
    environment: String,
}

impl MessageQueries {
    pub fn new(
        storage: Arc<dyn MessageStorage>,
        publish: Arc<PublishHandler>,
        receive: Arc<ReceiveHandler>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            publish,
            receive,
            environment: environment.into(),
        }
    }

    pub async fn status_counts(
        &self,
        kind: MessageKind,
    ) -> Result<BTreeMap<MessageStatus, u64>, StorageError> {
        let counts = self.storage.status_counts(kind, &self.environment).await?;
        Ok(MessageStatus::STORED
            .iter()
            .map(|status| (*status, counts.get(status).copied().unwrap_or(0)))
            .collect())
    }

    pub async fn search(
        &self,
        kind: MessageKind,
        query: &MessageQuery,
    ) -> Result<MessagePage, StorageError> {
        let counts = self.status_counts(kind).await?;
        let page_size = if query.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            query.page_size.min(MAX_PAGE_SIZE)
        };
        let page_index = query.page_index.max(1);
        // Pages past the addressable range are simply empty.
        let skip = (page_index - 1).saturating_mul(page_size);

        let status = if query.status.is_any() {
            MessageStatus::STORED
                .iter()
                .copied()
                .find(|s| counts.get(s).copied().unwrap_or(0) > 0)
                .unwrap_or(MessageStatus::None)
        } else {
            query.status
        };

        let filter = SearchFilter::new(self.environment.clone())
            .with_event_name(query.event_name.as_deref())
            .with_handler_name(query.event_handler_name.as_deref())
            .with_status(status);
        let messages = self
            .storage
            .search(kind, &filter, skip, page_size)
            .await?;

        let total = if status.is_any() {
            0
        } else {
            counts.get(&status).copied().unwrap_or(0) as usize
        };

        Ok(MessagePage {
            status_counts: counts
                .into_iter()
                .map(|(status, count)| (status.to_string(), count))
                .collect(),
            status,
            page_index,
            page_size,
            total_page: total.div_ceil(page_size),
            messages,
        })
    }

    pub async fn retry_published(&self, id: &RecordId) -> HandleOutcome {
        tracing::info!(record_id = %id, "Manual retry of published message");
        self.publish.locking_handle(id).await
    }

    pub async fn retry_received(&self, id: &RecordId) -> HandleOutcome {
        tracing::info!(record_id = %id, "Manual retry of received message");
        self.receive.locking_handle(id).await
    }

    /// Retries each id in turn; one failure does not stop the rest.
    pub async fn retry(&self, kind: MessageKind, ids: &[RecordId]) -> Vec<(RecordId, HandleOutcome)> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = match kind {
                MessageKind::Published => self.retry_published(id).await,
                MessageKind::Received => self.retry_received(id).await,
            };
            outcomes.push((id.clone(), outcome));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryMessageStorage;
    use crate::adapters::memory_queue::InMemoryBroker;
    use crate::adapters::serialization::JsonMessageSerializer;
    use crate::application::handler_registry::HandlerRegistry;
    use crate::config::BusConfig;
    use crate::domain::message::{NewMessage, StatusUpdate};
    use crate::ports::{MessageKey, MessageSerializer};

    struct Fixture {
        storage: Arc<InMemoryMessageStorage>,
        broker: Arc<InMemoryBroker>,
        queries: MessageQueries,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryMessageStorage::new());
        let serializer: Arc<dyn MessageSerializer> = Arc::new(JsonMessageSerializer::new());
        let broker = Arc::new(InMemoryBroker::new(serializer.clone()));
        let config = BusConfig::for_environment("test");
        let publish = Arc::new(PublishHandler::new(
            storage.clone(),
            broker.clone(),
            serializer.clone(),
            &config,
        ));
        let receive = Arc::new(ReceiveHandler::new(
            storage.clone(),
            Arc::new(HandlerRegistry::new()),
            serializer,
            &config,
        ));
        let queries = MessageQueries::new(storage.clone(), publish, receive, "test");
        Fixture {
            storage,
            broker,
            queries,
        }
    }

    async fn seed(storage: &InMemoryMessageStorage, event: &str, count: usize, fail: bool) {
        for i in 0..count {
            let message =
                NewMessage::scheduled("test", event, format!("{event}-{i}"), "{}", "{}");
            let id = storage.save_published(&message, None).await.unwrap();
            if fail {
                storage
                    .update_status(MessageKind::Published, &id, StatusUpdate::failed(1))
                    .await
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn missing_status_selects_first_non_empty_bucket() {
        let f = fixture();
        seed(&f.storage, "OrderPlaced", 3, true).await;

        let page = f
            .queries
            .search(MessageKind::Published, &MessageQuery::default())
            .await
            .unwrap();

        assert_eq!(page.status, MessageStatus::Failed);
        assert_eq!(page.messages.len(), 3);
        assert_eq!(page.status_counts["Scheduled"], 0);
        assert_eq!(page.status_counts["Failed"], 3);
        assert_eq!(page.total_page, 1);
    }

    #[tokio::test]
    async fn pages_are_offset_by_one_based_index() {
        let f = fixture();
        seed(&f.storage, "OrderPlaced", 5, false).await;

        let query = MessageQuery {
            status: MessageStatus::Scheduled,
            page_index: 2,
            page_size: 2,
            ..Default::default()
        };
        let page = f.queries.search(MessageKind::Published, &query).await.unwrap();

        assert_eq!(page.total_page, 3);
        assert_eq!(page.page_index, 2);
        assert_eq!(page.messages.len(), 2);
    }

    #[tokio::test]
    async fn event_name_filter_narrows_results() {
        let f = fixture();
        seed(&f.storage, "OrderPlaced", 2, false).await;
        seed(&f.storage, "OrderShipped", 1, false).await;

        let query = MessageQuery {
            event_name: Some("OrderShipped".to_string()),
            ..Default::default()
        };
        let page = f.queries.search(MessageKind::Published, &query).await.unwrap();

        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].event_name, "OrderShipped");
    }

    #[tokio::test]
    async fn empty_storage_searches_any_status() {
        let f = fixture();
        let page = f
            .queries
            .search(MessageKind::Received, &MessageQuery::default())
            .await
            .unwrap();

        assert_eq!(page.status, MessageStatus::None);
        assert!(page.messages.is_empty());
        assert_eq!(page.total_page, 0);
    }

    #[tokio::test]
    async fn far_out_of_range_pages_are_empty() {
        let f = fixture();
        seed(&f.storage, "OrderPlaced", 3, true).await;

        let page = f
            .queries
            .search(
                MessageKind::Published,
                &MessageQuery {
                    page_index: usize::MAX,
                    page_size: usize::MAX,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(page.page_size, MAX_PAGE_SIZE);
        assert!(page.messages.is_empty());
        assert_eq!(page.total_page, 1);
    }

    #[tokio::test]
    async fn manual_retry_resends_failed_message() {
        let f = fixture();
        seed(&f.storage, "OrderPlaced", 1, true).await;
        let record = f
            .storage
            .find_published_by_msg_id(MessageKey::new("test", "OrderPlaced", "OrderPlaced-0"))
            .await
            .unwrap()
            .unwrap();

        let outcomes = f
            .queries
            .retry(MessageKind::Published, &[record.id.clone(), RecordId::generate()])
            .await;

        assert_eq!(outcomes[0].1, HandleOutcome::Completed);
        assert!(outcomes[1].1.is_success());
        assert_eq!(f.broker.sent_count(), 1);
    }
}
