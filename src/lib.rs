//! Outbox Bus - transactional-outbox event bus.
//!
//! Business code writes events into an outbox table inside its own
//! transaction; the bus sends them after commit, records every receive
//! idempotently, and retries anything left behind under a storage lease so
//! that several nodes can share one store.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use application::{EventBus, EventBusBuilder, EventPublisher, HandleOutcome, RunningBus};
pub use config::{AppConfig, BusConfig};
pub use domain::message::{Event, MessageStatus};
pub use ports::{EventHandler, MessageStorage, TransactionContext};
