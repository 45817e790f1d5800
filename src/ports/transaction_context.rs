//! TransactionContext port - visibility into an externally-owned transaction.
//!
//! The bus never commits or rolls back the caller's transaction. It only
//! enlists the outbox insert into it (storage adapters downcast the context
//! to their own transaction type) and observes its outcome before sending.

use std::any::Any;

/// Lifecycle of a business transaction as seen by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// Handle to a caller-owned atomic transaction.
///
/// # Example
///
/// ```ignore
/// let tx = InMemoryTransaction::begin();
/// orders.insert_in(&tx, order);
/// publisher.publish(&OrderPlaced { .. }, Some(tx.context()), None).await?;
/// tx.commit()?;
/// ```
pub trait TransactionContext: Send + Sync {
    fn state(&self) -> TransactionState;

    /// Whether the transaction has concluded, by commit or rollback.
    fn is_done(&self) -> bool {
        self.state() != TransactionState::Active
    }

    /// Used by storage adapters to recover their concrete transaction type.
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(TransactionState);

    impl TransactionContext for Fixed {
        fn state(&self) -> TransactionState {
            self.0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn active_transaction_is_not_done() {
        assert!(!Fixed(TransactionState::Active).is_done());
        assert!(Fixed(TransactionState::Committed).is_done());
        assert!(Fixed(TransactionState::RolledBack).is_done());
    }

    #[test]
    fn context_downcasts_to_concrete_type() {
        let ctx: &dyn TransactionContext = &Fixed(TransactionState::Active);
        assert!(ctx.as_any().downcast_ref::<Fixed>().is_some());
    }
}
