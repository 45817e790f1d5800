//! EventBus - wires ports, pipelines and background loops together.
//!
//! # Example
//!
//! ```ignore
//! let bus = EventBus::builder(config.bus.clone())
//!     .with_storage(storage)
//!     .with_sender(broker.clone())
//!     .with_subscriber(broker)
//!     .add_handler::<OrderPlaced, _>(SendReceipt::new(mailer))
//!     .build()?;
//!
//! let running = bus.start();
//! running.bus().publisher().publish(&event, Some(tx.context()), None).await?;
//! let exits = running.shutdown().await;
//! ```

use futures::FutureExt;
use std::sync::Arc;

use thiserror::Error;

use crate::adapters::serialization::JsonMessageSerializer;
use crate::config::{BusConfig, ValidationError as ConfigValidationError};
use crate::domain::foundation::{DomainError, ErrorCode, ValidationError};
use crate::domain::message::{DefaultNameRuler, Event, NameRuler};
use crate::ports::{
    EventHandler, EventSubscriber, MessageListener, MessageSender, MessageSerializer,
    MessageStorage,
};

use super::event_publisher::EventPublisher;
use super::expiry_coordinator::ExpiryCoordinator;
use super::handler_registry::HandlerRegistry;
use super::message_listener::{DefaultMessageListener, DelayedHandling};
use super::message_queries::MessageQueries;
use super::publish_handler::PublishHandler;
use super::receive_handler::ReceiveHandler;
use super::retry_coordinator::RetryCoordinator;
use super::supervisor::{Supervisor, SupervisorConfig, TaskExit, TaskFactory};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus requires a {0}")]
    MissingComponent(&'static str),

    #[error("invalid bus configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("invalid handler registration: {0}")]
    Handler(#[from] ValidationError),
}

type Registration = Box<
    dyn FnOnce(
            &mut HandlerRegistry,
            &dyn NameRuler,
            Arc<dyn MessageSerializer>,
        ) -> Result<(), ValidationError>
        + Send,
>;

pub struct EventBusBuilder {
    config: BusConfig,
    storage: Option<Arc<dyn MessageStorage>>,
    sender: Option<Arc<dyn MessageSender>>,
    subscriber: Option<Arc<dyn EventSubscriber>>,
    serializer: Arc<dyn MessageSerializer>,
    ruler: Arc<dyn NameRuler>,
    registrations: Vec<Registration>,
}

impl EventBusBuilder {
    pub fn with_storage(mut self, storage: Arc<dyn MessageStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    /// Replaces the default JSON serializer.
    pub fn with_serializer(mut self, serializer: Arc<dyn MessageSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Replaces the default naming rule.
    pub fn with_name_ruler(mut self, ruler: Arc<dyn NameRuler>) -> Self {
        self.ruler = ruler;
        self
    }

    /// Registers `handler` for event `E`. Names are resolved at build time.
    pub fn add_handler<E, H>(mut self, handler: H) -> Self
    where
        E: Event,
        H: EventHandler<E>,
    {
        self.registrations
            .push(Box::new(
                move |registry: &mut HandlerRegistry,
                      ruler: &dyn NameRuler,
                      serializer: Arc<dyn MessageSerializer>| {
                    registry
                        .register::<E, H>(handler, ruler, serializer)
                        .map(|_| ())
                },
            ));
        self
    }

    pub fn build(self) -> Result<EventBus, BusError> {
        self.config.validate()?;
        let storage = self.storage.ok_or(BusError::MissingComponent("storage"))?;
        let sender = self.sender.ok_or(BusError::MissingComponent("sender"))?;

        let mut registry = HandlerRegistry::new();
        for register in self.registrations {
            register(&mut registry, self.ruler.as_ref(), self.serializer.clone())?;
        }
        if !registry.is_empty() && self.subscriber.is_none() {
            return Err(BusError::MissingComponent("subscriber"));
        }
        let registry = Arc::new(registry);

        let config = self.config;
        let serializer = self.serializer;
        let publish_handler = Arc::new(PublishHandler::new(
            storage.clone(),
            sender,
            serializer.clone(),
            &config,
        ));
        let receive_handler = Arc::new(ReceiveHandler::new(
            storage.clone(),
            registry.clone(),
            serializer.clone(),
            &config,
        ));
        let publisher = Arc::new(EventPublisher::new(
            storage.clone(),
            publish_handler.clone(),
            serializer.clone(),
            self.ruler,
            &config,
        ));
        let queries = Arc::new(MessageQueries::new(
            storage.clone(),
            publish_handler.clone(),
            receive_handler.clone(),
            config.environment.clone(),
        ));
        let retry = Arc::new(RetryCoordinator::new(
            storage.clone(),
            publish_handler,
            receive_handler.clone(),
            &config,
        ));
        let expiry = Arc::new(ExpiryCoordinator::new(storage.clone(), &config));

        Ok(EventBus {
            config,
            storage,
            subscriber: self.subscriber,
            serializer,
            registry,
            receive_handler,
            delayed: Arc::new(DelayedHandling::new()),
            publisher,
            queries,
            retry,
            expiry,
        })
    }
}

/// A configured bus, not yet running background loops.
pub struct EventBus {
    config: BusConfig,
    storage: Arc<dyn MessageStorage>,
    subscriber: Option<Arc<dyn EventSubscriber>>,
    serializer: Arc<dyn MessageSerializer>,
    registry: Arc<HandlerRegistry>,
    receive_handler: Arc<ReceiveHandler>,
    delayed: Arc<DelayedHandling>,
    publisher: Arc<EventPublisher>,
    queries: Arc<MessageQueries>,
    retry: Arc<RetryCoordinator>,
    expiry: Arc<ExpiryCoordinator>,
}

impl EventBus {
    pub fn builder(config: BusConfig) -> EventBusBuilder {
        EventBusBuilder {
            config,
            storage: None,
            sender: None,
            subscriber: None,
            serializer: Arc::new(JsonMessageSerializer::new()),
            ruler: Arc::new(DefaultNameRuler),
            registrations: Vec::new(),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn publisher(&self) -> Arc<EventPublisher> {
        self.publisher.clone()
    }

    pub fn queries(&self) -> Arc<MessageQueries> {
        self.queries.clone()
    }

    pub fn retry_coordinator(&self) -> Arc<RetryCoordinator> {
        self.retry.clone()
    }

    pub fn expiry_coordinator(&self) -> Arc<ExpiryCoordinator> {
        self.expiry.clone()
    }

    pub fn registry(&self) -> Arc<HandlerRegistry> {
        self.registry.clone()
    }

    pub fn delayed_handling(&self) -> Arc<DelayedHandling> {
        self.delayed.clone()
    }

    /// Receive entry point for one registered handler.
    pub fn listener(&self, handler_name: &str) -> Option<Arc<dyn MessageListener>> {
        let invoker = self.registry.get(handler_name)?;
        Some(Arc::new(DefaultMessageListener::new(
            invoker.descriptor().clone(),
            self.storage.clone(),
            self.receive_handler.clone(),
            self.serializer.clone(),
            self.delayed.clone(),
            &self.config,
        )))
    }

    /// Starts the retry and expiry coordinators and one subscription per
    /// registered handler, all under a supervisor.
    pub fn start(self) -> RunningBus {
        let bus = Arc::new(self);
        let mut supervisor = Supervisor::new(SupervisorConfig::from_bus(&bus.config));

        let retry = bus.retry.clone();
        supervisor.spawn(
            "retry-coordinator",
            Arc::new(move |shutdown| {
                let retry = retry.clone();
                async move { retry.run(shutdown).await }.boxed()
            }),
        );

        let expiry = bus.expiry.clone();
        supervisor.spawn(
            "expiry-coordinator",
            Arc::new(move |shutdown| {
                let expiry = expiry.clone();
                async move { expiry.run(shutdown).await }.boxed()
            }),
        );

        if let Some(subscriber) = &bus.subscriber {
            for descriptor in bus.registry.descriptors() {
                let Some(listener) = bus.listener(&descriptor.event_handler_name) else {
                    continue;
                };
                supervisor.spawn(
                    format!("subscription:{}", descriptor.event_handler_name),
                    subscription_task(subscriber.clone(), listener),
                );
            }
        }

        tracing::info!(
            environment = %bus.config.environment,
            tasks = supervisor.task_names().len(),
            "Event bus started"
        );
        RunningBus { bus, supervisor }
    }
}

fn subscription_task(
    subscriber: Arc<dyn EventSubscriber>,
    listener: Arc<dyn MessageListener>,
) -> TaskFactory {
    Arc::new(move |shutdown| {
        let subscriber = subscriber.clone();
        let listener = listener.clone();
        async move {
            subscriber
                .subscribe(listener, shutdown)
                .await
                .map_err(|e| DomainError::new(ErrorCode::BrokerError, e.to_string()))
        }
        .boxed()
    })
}

/// A bus with its background loops running.
pub struct RunningBus {
    bus: Arc<EventBus>,
    supervisor: Supervisor,
}

impl RunningBus {
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.supervisor.task_names()
    }

    /// Waits for in-flight publishes, then stops every background loop and
    /// cancels delayed handling still waiting.
    pub async fn shutdown(self) -> Vec<TaskExit> {
        self.bus.publisher.flush().await;
        let exits = self.supervisor.shutdown().await;
        self.bus.delayed.close().await;
        tracing::info!(tasks = exits.len(), "Event bus stopped");
        exits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryMessageStorage;
    use crate::adapters::memory_queue::InMemoryBroker;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize)]
    struct OrderPlaced {
        order_id: u64,
    }

    impl Event for OrderPlaced {}

    struct Noop;

    #[async_trait]
    impl EventHandler<OrderPlaced> for Noop {
        async fn handle(
            &self,
            _event: OrderPlaced,
            _items: &HashMap<String, String>,
        ) -> Result<(), DomainError> {
            Ok(())
        }
    }

    fn broker() -> Arc<InMemoryBroker> {
        Arc::new(InMemoryBroker::new(Arc::new(JsonMessageSerializer::new())))
    }

    #[test]
    fn build_requires_storage_and_sender() {
        let err = EventBus::builder(BusConfig::default()).build().err().unwrap();
        assert!(matches!(err, BusError::MissingComponent("storage")));

        let err = EventBus::builder(BusConfig::default())
            .with_storage(Arc::new(InMemoryMessageStorage::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BusError::MissingComponent("sender")));
    }

    #[test]
    fn handlers_require_a_subscriber() {
        let err = EventBus::builder(BusConfig::default())
            .with_storage(Arc::new(InMemoryMessageStorage::new()))
            .with_sender(broker())
            .add_handler::<OrderPlaced, _>(Noop)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BusError::MissingComponent("subscriber")));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = BusConfig {
            lock_time_secs: 0,
            ..Default::default()
        };
        let err = EventBus::builder(config).build().err().unwrap();
        assert!(matches!(err, BusError::Config(_)));
    }

    #[tokio::test]
    async fn start_supervises_coordinators_and_subscriptions() {
        let broker = broker();
        let bus = EventBus::builder(BusConfig::for_environment("test"))
            .with_storage(Arc::new(InMemoryMessageStorage::new()))
            .with_sender(broker.clone())
            .with_subscriber(broker)
            .add_handler::<OrderPlaced, _>(Noop)
            .build()
            .unwrap();
        assert!(bus.listener("Noop").is_some());
        assert!(bus.listener("Missing").is_none());

        let running = bus.start();
        assert_eq!(
            running.task_names(),
            vec!["retry-coordinator", "expiry-coordinator", "subscription:Noop"]
        );

        let exits = running.shutdown().await;
        assert_eq!(exits.len(), 3);
        assert!(exits.iter().all(|exit| exit.result.is_ok()));
    }
}
