//! In-process broker adapter.

mod broker;

pub use broker::InMemoryBroker;
