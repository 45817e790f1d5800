//! In-process broker implementing both MessageSender and EventSubscriber.
//!
//! Routing mirrors a fanout exchange with one durable queue per consumer
//! group: every handler group subscribed to an event name gets its own copy,
//! and subscribers within one group compete for it round-robin. Envelopes
//! travel as serialized bytes so the codec is exercised like a real broker.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::domain::message::MessageTransferModel;
use crate::ports::{
    EventSubscriber, MessageListener, MessageSender, MessageSerializer, MessageSerializerExt,
    SendError, SubscribeError,
};

/// Delay before a rejected envelope is put back on its queue.
const REDELIVERY_DELAY: Duration = Duration::from_millis(500);

/// Most recent envelopes kept for inspection; older ones are discarded.
const SENT_HISTORY: usize = 256;

type Payload = Vec<u8>;

#[derive(Default)]
struct ConsumerGroup {
    consumers: Vec<mpsc::UnboundedSender<Payload>>,
    next: usize,
}

impl ConsumerGroup {
    /// Hands the payload to the next live consumer; false when none is left.
    fn dispatch(&mut self, payload: Payload) -> bool {
        self.consumers.retain(|tx| !tx.is_closed());
        if self.consumers.is_empty() {
            return false;
        }
        let slot = self.next % self.consumers.len();
        self.next = self.next.wrapping_add(1);
        self.consumers[slot].send(payload).is_ok()
    }
}

/// event name -> handler group -> consumers
type Routes = HashMap<String, HashMap<String, ConsumerGroup>>;

/// In-process broker.
///
/// # Example
///
/// ```ignore
/// let broker = Arc::new(InMemoryBroker::new(Arc::new(JsonMessageSerializer::new())));
/// tokio::spawn({
///     let broker = broker.clone();
///     async move { broker.subscribe(listener, shutdown_rx).await }
/// });
/// broker.send(&envelope).await?;
/// ```
pub struct InMemoryBroker {
    serializer: Arc<dyn MessageSerializer>,
    routes: Mutex<Routes>,
    available: AtomicBool,
    sent: Mutex<VecDeque<MessageTransferModel>>,
    sent_total: AtomicUsize,
}

impl InMemoryBroker {
    pub fn new(serializer: Arc<dyn MessageSerializer>) -> Self {
        Self {
            serializer,
            routes: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            sent: Mutex::new(VecDeque::new()),
            sent_total: AtomicUsize::new(0),
        }
    }

    // === Test Helpers ===

    /// Makes `send` fail with `SendError::Unavailable` while false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// The most recent envelopes accepted by `send`, oldest first.
    pub fn sent_messages(&self) -> Vec<MessageTransferModel> {
        lock(&self.sent).iter().cloned().collect()
    }

    /// Envelopes accepted by `send` since creation.
    pub fn sent_count(&self) -> usize {
        self.sent_total.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions for `event_name` across all groups.
    pub fn subscriber_count(&self, event_name: &str) -> usize {
        lock(&self.routes)
            .get(event_name)
            .map(|groups| {
                groups
                    .values()
                    .map(|g| g.consumers.iter().filter(|tx| !tx.is_closed()).count())
                    .sum()
            })
            .unwrap_or(0)
    }

    // === Internals ===

    fn register(
        &self,
        event_name: &str,
        group: &str,
        tx: mpsc::UnboundedSender<Payload>,
    ) {
        lock(&self.routes)
            .entry(event_name.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default()
            .consumers
            .push(tx);
    }

    fn route(&self, event_name: &str, payload: Payload) -> usize {
        let mut routes = lock(&self.routes);
        let Some(groups) = routes.get_mut(event_name) else {
            return 0;
        };
        let mut delivered = 0;
        for group in groups.values_mut() {
            if group.dispatch(payload.clone()) {
                delivered += 1;
            }
        }
        delivered
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl MessageSender for InMemoryBroker {
    async fn send(&self, message: &MessageTransferModel) -> Result<(), SendError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SendError::Unavailable("broker is unavailable".to_string()));
        }

        let payload = self.serializer.serialize_to_bytes(message)?;
        {
            let mut sent = lock(&self.sent);
            if sent.len() == SENT_HISTORY {
                sent.pop_front();
            }
            sent.push_back(message.clone());
        }
        self.sent_total.fetch_add(1, Ordering::SeqCst);

        let delivered = self.route(&message.event_name, payload);
        tracing::debug!(
            event_name = %message.event_name,
            msg_id = %message.msg_id,
            groups = delivered,
            "Envelope routed"
        );
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for InMemoryBroker {
    async fn subscribe(
        &self,
        listener: Arc<dyn MessageListener>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SubscribeError> {
        let descriptor = listener.descriptor().clone();
        let (tx, mut rx) = mpsc::unbounded_channel::<Payload>();
        self.register(&descriptor.event_name, &descriptor.event_handler_name, tx.clone());

        tracing::info!(
            event_name = %descriptor.event_name,
            handler = %descriptor.event_handler_name,
            "Subscription started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }

                payload = rx.recv() => {
                    let Some(payload) = payload else {
                        return Err(SubscribeError::Closed(descriptor.event_handler_name.clone()));
                    };

                    let message: MessageTransferModel = match self.serializer.deserialize_bytes(&payload) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!(
                                handler = %descriptor.event_handler_name,
                                error = %e,
                                "Dropping undecodable envelope"
                            );
                            continue;
                        }
                    };

                    if message.event_name != descriptor.event_name {
                        tracing::warn!(
                            expected = %descriptor.event_name,
                            actual = %message.event_name,
                            msg_id = %message.msg_id,
                            "Dropping envelope for another event"
                        );
                        continue;
                    }

                    let listener = listener.clone();
                    let requeue = tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = listener.on_receive(message.clone()).await {
                            tracing::warn!(
                                msg_id = %message.msg_id,
                                handler = %listener.descriptor().event_handler_name,
                                error = %e,
                                "Listener rejected envelope, redelivering"
                            );
                            tokio::time::sleep(REDELIVERY_DELAY).await;
                            let _ = requeue.send(payload);
                        }
                    });
                }
            }
        }

        tracing::info!(
            event_name = %descriptor.event_name,
            handler = %descriptor.event_handler_name,
            "Subscription stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::serialization::JsonMessageSerializer;
    use crate::domain::foundation::Timestamp;
    use crate::domain::message::EventHandlerDescriptor;
    use crate::ports::ReceiveError;
    use std::sync::atomic::AtomicUsize;

    struct CountingListener {
        descriptor: EventHandlerDescriptor,
        received: AtomicUsize,
        fail_first: AtomicBool,
    }

    impl CountingListener {
        fn new(handler: &'static str) -> Arc<Self> {
            Arc::new(Self {
                descriptor: EventHandlerDescriptor::new(
                    handler,
                    "OrderPlaced",
                    "OrderPlaced",
                    handler,
                )
                .unwrap(),
                received: AtomicUsize::new(0),
                fail_first: AtomicBool::new(false),
            })
        }

        fn count(&self) -> usize {
            self.received.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageListener for CountingListener {
        fn descriptor(&self) -> &EventHandlerDescriptor {
            &self.descriptor
        }

        async fn on_receive(&self, _message: MessageTransferModel) -> Result<(), ReceiveError> {
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(crate::ports::StorageError::Unavailable("down".into()).into());
            }
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn envelope(msg_id: &str) -> MessageTransferModel {
        MessageTransferModel {
            event_name: "OrderPlaced".to_string(),
            environment: "test".to_string(),
            msg_id: msg_id.to_string(),
            msg_body: "{}".to_string(),
            items: HashMap::new(),
            send_at: Timestamp::now(),
            delay_at: None,
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn broker() -> Arc<InMemoryBroker> {
        Arc::new(InMemoryBroker::new(Arc::new(JsonMessageSerializer::new())))
    }

    fn spawn_subscription(
        broker: &Arc<InMemoryBroker>,
        listener: Arc<CountingListener>,
        shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<Result<(), SubscribeError>> {
        let broker = broker.clone();
        tokio::spawn(async move { broker.subscribe(listener, shutdown).await })
    }

    #[tokio::test]
    async fn every_handler_group_gets_a_copy() {
        let broker = broker();
        let (_stop, shutdown) = watch::channel(false);
        let a = CountingListener::new("A");
        let b = CountingListener::new("B");
        spawn_subscription(&broker, a.clone(), shutdown.clone());
        spawn_subscription(&broker, b.clone(), shutdown);
        wait_for(|| broker.subscriber_count("OrderPlaced") == 2).await;

        broker.send(&envelope("m1")).await.unwrap();
        wait_for(|| a.count() == 1 && b.count() == 1).await;

        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);
    }

    #[tokio::test]
    async fn rejected_envelope_is_redelivered() {
        let broker = broker();
        let (_stop, shutdown) = watch::channel(false);
        let listener = CountingListener::new("A");
        listener.fail_first.store(true, Ordering::SeqCst);
        spawn_subscription(&broker, listener.clone(), shutdown);
        wait_for(|| broker.subscriber_count("OrderPlaced") == 1).await;

        broker.send(&envelope("m1")).await.unwrap();
        wait_for(|| listener.count() == 1).await;

        assert_eq!(listener.count(), 1);
    }

    #[tokio::test]
    async fn unavailable_broker_rejects_sends() {
        let broker = broker();
        broker.set_available(false);

        let err = broker.send(&envelope("m1")).await.unwrap_err();
        assert!(matches!(err, SendError::Unavailable(_)));
        assert_eq!(broker.sent_count(), 0);
    }

    #[tokio::test]
    async fn sent_history_keeps_only_recent_envelopes() {
        let broker = broker();
        let total = SENT_HISTORY + 10;
        for i in 0..total {
            broker.send(&envelope(&format!("m{i}"))).await.unwrap();
        }

        let kept = broker.sent_messages();
        assert_eq!(broker.sent_count(), total);
        assert_eq!(kept.len(), SENT_HISTORY);
        assert_eq!(kept[0].msg_id, "m10");
        assert_eq!(kept[SENT_HISTORY - 1].msg_id, format!("m{}", total - 1));
    }

    #[tokio::test]
    async fn subscription_ends_on_shutdown() {
        let broker = broker();
        let (stop, shutdown) = watch::channel(false);
        let handle = spawn_subscription(&broker, CountingListener::new("A"), shutdown);
        wait_for(|| broker.subscriber_count("OrderPlaced") == 1).await;

        stop.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
