//! In-memory storage adapter.
//!
//! - `InMemoryMessageStorage` - MessageStorage over process-local tables
//! - `InMemoryTransaction` - Unit of work whose writes land on commit

mod storage;
mod transaction;

pub use storage::InMemoryMessageStorage;
pub use transaction::{InMemoryTransaction, TransactionHandle};
