//! Adapters - Implementations of port interfaces.
//!
//! - `memory` - In-memory message storage and transactions
//! - `memory_queue` - In-process broker (sender + subscriber)
//! - `serialization` - JSON envelope serializer
//! - `http` - Operational read API

pub mod http;
pub mod memory;
pub mod memory_queue;
pub mod serialization;

pub use memory::{InMemoryMessageStorage, InMemoryTransaction, TransactionHandle};
pub use memory_queue::InMemoryBroker;
pub use serialization::JsonMessageSerializer;
