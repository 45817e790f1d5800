//! Application layer - delivery pipelines and background coordination.
//!
//! - `EventPublisher` - business entry point; writes outbox records
//! - `PublishHandler` / `ReceiveHandler` - send and handle pipelines
//! - `DefaultMessageListener` - receive entry point called by subscribers
//! - `RetryCoordinator` / `ExpiryCoordinator` - periodic pollers
//! - `Supervisor` - restartable background tasks
//! - `MessageQueries` - operational read side and manual retry
//! - `EventBus` - wiring of all of the above

mod attempt;
mod bus;
mod event_publisher;
mod expiry_coordinator;
mod handle_outcome;
mod handler_registry;
mod message_listener;
mod message_queries;
mod publish_handler;
mod receive_handler;
mod retry_coordinator;
mod supervisor;

pub use bus::{BusError, EventBus, EventBusBuilder, RunningBus};
pub use event_publisher::{EventPublisher, PublishError};
pub use expiry_coordinator::{ExpiryCoordinator, ExpiryReport};
pub use handle_outcome::{FailedAttempt, HandleOutcome, NoOpReason};
pub use handler_registry::HandlerRegistry;
pub use message_listener::{DefaultMessageListener, DelayedHandling};
pub use message_queries::{
    MessagePage, MessageQueries, MessageQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use publish_handler::PublishHandler;
pub use receive_handler::ReceiveHandler;
pub use retry_coordinator::{RetryCoordinator, RetryReport, RetryTally};
pub use supervisor::{
    Supervisor, SupervisorConfig, SupervisorError, TaskExit, TaskFactory, TaskFuture,
};
