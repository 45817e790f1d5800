//! In-memory unit of work implementing TransactionContext.
//!
//! Writes enlisted in the transaction are staged and applied together on
//! commit. Rolling back, or dropping the transaction while still active,
//! discards them.
//!
//! Storage inserts are staged as guarded writes: each re-checks its
//! constraints when applied. If one is rejected the guarded writes already
//! applied are undone, plain writes never run and the commit fails.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::ports::{StorageError, TransactionContext, TransactionState};

type CommitAction = Box<dyn FnOnce() + Send>;
type GuardedAction = Box<dyn FnOnce() -> Result<(), StorageError> + Send>;

struct GuardedWrite {
    apply: GuardedAction,
    undo: CommitAction,
}

struct TransactionInner {
    state: TransactionState,
    guarded: Vec<GuardedWrite>,
    staged: Vec<CommitAction>,
}

/// Shared view of a transaction, handed to the bus as a context.
#[derive(Clone)]
pub struct TransactionHandle {
    inner: Arc<Mutex<TransactionInner>>,
}

impl TransactionHandle {
    fn lock(&self) -> MutexGuard<'_, TransactionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stages a write to be applied on commit.
    pub fn enlist(&self, action: impl FnOnce() + Send + 'static) -> Result<(), StorageError> {
        let mut inner = self.active()?;
        inner.staged.push(Box::new(action));
        Ok(())
    }

    /// Stages a write that may still be rejected at commit time.
    ///
    /// `undo` reverts `apply` when a later guarded write is rejected.
    pub fn enlist_guarded(
        &self,
        apply: impl FnOnce() -> Result<(), StorageError> + Send + 'static,
        undo: impl FnOnce() + Send + 'static,
    ) -> Result<(), StorageError> {
        let mut inner = self.active()?;
        inner.guarded.push(GuardedWrite {
            apply: Box::new(apply),
            undo: Box::new(undo),
        });
        Ok(())
    }

    fn active(&self) -> Result<MutexGuard<'_, TransactionInner>, StorageError> {
        let inner = self.lock();
        if inner.state != TransactionState::Active {
            return Err(StorageError::Unavailable(format!(
                "transaction already {:?}",
                inner.state
            )));
        }
        Ok(inner)
    }

    fn finish(&self, commit: bool) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.state != TransactionState::Active {
            return Err(StorageError::Unavailable(format!(
                "transaction already {:?}",
                inner.state
            )));
        }
        let guarded = std::mem::take(&mut inner.guarded);
        let staged = std::mem::take(&mut inner.staged);
        if !commit {
            inner.state = TransactionState::RolledBack;
            return Ok(());
        }

        // Applied before the state flips so observers never see a
        // committed transaction whose writes are missing.
        let mut applied: Vec<CommitAction> = Vec::with_capacity(guarded.len());
        for write in guarded {
            if let Err(e) = (write.apply)() {
                for undo in applied.into_iter().rev() {
                    undo();
                }
                inner.state = TransactionState::RolledBack;
                return Err(e);
            }
            applied.push(write.undo);
        }
        for action in staged {
            action();
        }
        inner.state = TransactionState::Committed;
        Ok(())
    }
}

impl TransactionContext for TransactionHandle {
    fn state(&self) -> TransactionState {
        self.lock().state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Caller-owned in-memory transaction.
///
/// # Example
///
/// ```ignore
/// let tx = InMemoryTransaction::begin();
/// publisher.publish(&event, Some(tx.context()), None).await?;
/// tx.commit()?;
/// ```
pub struct InMemoryTransaction {
    handle: TransactionHandle,
}

impl InMemoryTransaction {
    pub fn begin() -> Self {
        Self {
            handle: TransactionHandle {
                inner: Arc::new(Mutex::new(TransactionInner {
                    state: TransactionState::Active,
                    guarded: Vec::new(),
                    staged: Vec::new(),
                })),
            },
        }
    }

    /// Context to pass to the bus; stays valid after the transaction ends.
    pub fn context(&self) -> Arc<dyn TransactionContext> {
        Arc::new(self.handle.clone())
    }

    /// Stages a business write alongside the outbox insert.
    pub fn enlist(&self, action: impl FnOnce() + Send + 'static) -> Result<(), StorageError> {
        self.handle.enlist(action)
    }

    /// Applies every staged write, or none of them.
    ///
    /// # Errors
    ///
    /// Returns the rejection of the first guarded write that failed; the
    /// transaction is then rolled back.
    pub fn commit(self) -> Result<(), StorageError> {
        self.handle.finish(true)
    }

    pub fn rollback(self) {
        let _ = self.handle.finish(false);
    }
}

impl TransactionContext for InMemoryTransaction {
    fn state(&self) -> TransactionState {
        self.handle.state()
    }

    /// Exposes the shared handle, so storage sees one concrete type whether
    /// it is given the transaction or its context.
    fn as_any(&self) -> &dyn Any {
        &self.handle
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.handle.state() == TransactionState::Active {
            let _ = self.handle.finish(false);
        }
    }
}
