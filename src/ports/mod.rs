//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the delivery core and the outside world. Adapters implement these ports,
//! one per backend, selected at startup and injected.
//!
//! ## Storage Ports
//!
//! - `MessageStorage` - Durable records, leasing, retry/expiry queries, read API
//! - `TransactionContext` - Commit/rollback visibility of a caller-owned transaction
//!
//! ## Broker Ports
//!
//! - `MessageSender` - Outbound envelope delivery
//! - `EventSubscriber` / `MessageListener` - Inbound consume loop and its callback
//! - `MessageSerializer` - Envelope and item-map encoding
//!
//! ## Handler Ports
//!
//! - `EventHandler` - Typed business logic for a received event
//! - `HandlerInvoker` - Type-erased handler used by the receive pipeline

mod event_handler;
mod event_subscriber;
mod message_sender;
mod message_serializer;
mod message_storage;
mod transaction_context;

pub use event_handler::{EventHandler, HandlerInvoker, TypedInvoker};
pub use event_subscriber::{EventSubscriber, MessageListener, ReceiveError, SubscribeError};
pub use message_sender::{MessageSender, SendError};
pub use message_serializer::{MessageSerializer, MessageSerializerExt, SerializationError};
pub use message_storage::{MessageKey, MessageStorage, RetryQuery, SearchFilter, StorageError};
pub use transaction_context::{TransactionContext, TransactionState};
