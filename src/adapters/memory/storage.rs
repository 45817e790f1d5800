//! In-memory MessageStorage.
//!
//! Holds both record tables behind one mutex, so every operation, including
//! the conditional lease write, is atomic with respect to every other. Suits
//! tests and single-process deployments; records do not survive a restart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::foundation::{RecordId, StateMachine, Timestamp};
use crate::domain::message::{
    EventHandlerDescriptor, MessageKind, MessageRecord, MessageStatus, NewMessage, StatusUpdate,
};
use crate::ports::{
    MessageKey, MessageStorage, RetryQuery, SearchFilter, StorageError, TransactionContext,
};

use super::transaction::TransactionHandle;

#[derive(Default)]
struct Tables {
    published: HashMap<RecordId, MessageRecord>,
    received: HashMap<RecordId, MessageRecord>,
}

impl Tables {
    fn table(&self, kind: MessageKind) -> &HashMap<RecordId, MessageRecord> {
        match kind {
            MessageKind::Published => &self.published,
            MessageKind::Received => &self.received,
        }
    }

    fn table_mut(&mut self, kind: MessageKind) -> &mut HashMap<RecordId, MessageRecord> {
        match kind {
            MessageKind::Published => &mut self.published,
            MessageKind::Received => &mut self.received,
        }
    }

    fn has_published(&self, key: MessageKey<'_>) -> bool {
        self.published.values().any(|r| key.matches(r))
    }

    fn has_received(&self, message: &NewMessage) -> bool {
        self.received.values().any(|r| {
            r.msg_id == message.msg_id
                && r.environment == message.environment
                && r.event_name == message.event_name
                && r.event_handler_name == message.event_handler_name
        })
    }
}

/// In-memory storage for published and received records.
///
/// Clones share the same tables.
///
/// # Example
///
/// ```ignore
/// let storage = Arc::new(InMemoryMessageStorage::new());
/// let id = storage.save_published(&message, None).await?;
/// assert!(storage.try_lock(MessageKind::Published, &id, lock_end).await?);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryMessageStorage {
    tables: Arc<Mutex<Tables>>,
    sequence: Arc<AtomicU64>,
    offline: Arc<AtomicBool>,
    reject_status_updates: Arc<AtomicBool>,
}

impl InMemoryMessageStorage {
    pub fn new() -> Self {
        Self::default()
    }

    // === Test Helpers ===

    /// Makes every operation fail with `StorageError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes only `update_status` fail, leaving lookups and leases working.
    pub fn set_reject_status_updates(&self, reject: bool) {
        self.reject_status_updates.store(reject, Ordering::SeqCst);
    }

    /// Number of records of `kind`, across all environments.
    pub fn len(&self, kind: MessageKind) -> usize {
        self.lock_tables()
            .map(|tables| tables.table(kind).len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len(MessageKind::Published) == 0 && self.len(MessageKind::Received) == 0
    }

    /// Overwrites a stored record in place, e.g. to age it or expire a lease.
    pub fn replace(&self, kind: MessageKind, record: MessageRecord) -> Result<(), StorageError> {
        let mut tables = self.lock_tables()?;
        let table = tables.table_mut(kind);
        if !table.contains_key(&record.id) {
            return Err(StorageError::NotFound {
                kind,
                id: record.id,
            });
        }
        table.insert(record.id.clone(), record);
        Ok(())
    }

    // === Internals ===

    fn lock_tables(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("storage is offline".to_string()));
        }
        self.tables
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))
    }

    fn next_id(&self) -> RecordId {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        RecordId::new(n.to_string()).unwrap_or_else(|_| RecordId::generate())
    }
}

#[async_trait]
impl MessageStorage for InMemoryMessageStorage {
    async fn save_published(
        &self,
        message: &NewMessage,
        transaction: Option<&dyn TransactionContext>,
    ) -> Result<RecordId, StorageError> {
        let key = MessageKey::new(&message.environment, &message.event_name, &message.msg_id);
        let duplicate = || StorageError::Duplicate {
            kind: MessageKind::Published,
            msg_id: message.msg_id.clone(),
        };

        {
            let tables = self.lock_tables()?;
            if tables.has_published(key) {
                return Err(duplicate());
            }
        }

        let id = self.next_id();
        let record = message.clone().into_record(id.clone());

        match transaction {
            None => {
                let mut tables = self.lock_tables()?;
                if tables.has_published(key) {
                    return Err(duplicate());
                }
                tables.published.insert(id.clone(), record);
            }
            Some(tx) => {
                let handle = tx
                    .as_any()
                    .downcast_ref::<TransactionHandle>()
                    .ok_or(StorageError::UnsupportedTransaction)?;
                let tables = self.tables.clone();
                let staged_id = id.clone();
                let undo_tables = self.tables.clone();
                let undo_id = id.clone();
                // Another transaction may have committed the same key since
                // the check above.
                handle.enlist_guarded(
                    move || {
                        let mut tables = tables.lock().unwrap_or_else(|p| p.into_inner());
                        if tables.has_published(MessageKey::of(&record)) {
                            return Err(StorageError::Duplicate {
                                kind: MessageKind::Published,
                                msg_id: record.msg_id,
                            });
                        }
                        tables.published.insert(staged_id, record);
                        Ok(())
                    },
                    move || {
                        let mut tables = undo_tables.lock().unwrap_or_else(|p| p.into_inner());
                        tables.published.remove(&undo_id);
                    },
                )?;
            }
        }

        Ok(id)
    }

    async fn save_received(&self, message: &NewMessage) -> Result<RecordId, StorageError> {
        let mut tables = self.lock_tables()?;
        if tables.has_received(message) {
            return Err(StorageError::Duplicate {
                kind: MessageKind::Received,
                msg_id: message.msg_id.clone(),
            });
        }
        let id = self.next_id();
        tables
            .received
            .insert(id.clone(), message.clone().into_record(id.clone()));
        Ok(id)
    }

    async fn find_by_id(
        &self,
        kind: MessageKind,
        id: &RecordId,
    ) -> Result<Option<MessageRecord>, StorageError> {
        let tables = self.lock_tables()?;
        Ok(tables.table(kind).get(id).cloned())
    }

    async fn find_published_by_msg_id(
        &self,
        key: MessageKey<'_>,
    ) -> Result<Option<MessageRecord>, StorageError> {
        let tables = self.lock_tables()?;
        Ok(tables.published.values().find(|r| key.matches(r)).cloned())
    }

    async fn find_received_by_msg_id(
        &self,
        key: MessageKey<'_>,
        descriptor: &EventHandlerDescriptor,
    ) -> Result<Option<MessageRecord>, StorageError> {
        let tables = self.lock_tables()?;
        Ok(tables
            .received
            .values()
            .find(|r| {
                key.matches(r)
                    && r.event_name == descriptor.event_name
                    && r.event_handler_name.as_deref()
                        == Some(descriptor.event_handler_name.as_str())
            })
            .cloned())
    }

    async fn is_committed(&self, key: MessageKey<'_>) -> Result<bool, StorageError> {
        let tables = self.lock_tables()?;
        Ok(tables.has_published(key))
    }

    async fn try_lock(
        &self,
        kind: MessageKind,
        id: &RecordId,
        lock_end: Timestamp,
    ) -> Result<bool, StorageError> {
        let now = Timestamp::now();
        let mut tables = self.lock_tables()?;
        match tables.table_mut(kind).get_mut(id) {
            Some(record) if record.is_lockable_at(&now) => {
                record.is_locking = true;
                record.lock_end = Some(lock_end);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_status(
        &self,
        kind: MessageKind,
        id: &RecordId,
        update: StatusUpdate,
    ) -> Result<(), StorageError> {
        if self.reject_status_updates.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "status updates are rejected".to_string(),
            ));
        }
        let mut tables = self.lock_tables()?;
        let record = tables
            .table_mut(kind)
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound {
                kind,
                id: id.clone(),
            })?;

        let next = record
            .status
            .transition_to(update.status())
            .map_err(|_| StorageError::InvalidTransition {
                from: record.status,
                to: update.status(),
            })?;

        record.status = next;
        record.retry_count = update.retry_count();
        record.expire_time = update.expire_time();
        record.is_locking = false;
        record.lock_end = None;
        Ok(())
    }

    async fn search(
        &self,
        kind: MessageKind,
        filter: &SearchFilter,
        skip: usize,
        take: usize,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let tables = self.lock_tables()?;
        let mut matched: Vec<&MessageRecord> = tables
            .table(kind)
            .values()
            .filter(|r| filter.matches(r))
            .collect();
        matched.sort_by(|a, b| b.create_time.cmp(&a.create_time).then(b.id.cmp(&a.id)));
        Ok(matched.into_iter().skip(skip).take(take).cloned().collect())
    }

    async fn status_counts(
        &self,
        kind: MessageKind,
        environment: &str,
    ) -> Result<HashMap<MessageStatus, u64>, StorageError> {
        let tables = self.lock_tables()?;
        let mut counts: HashMap<MessageStatus, u64> =
            MessageStatus::STORED.iter().map(|s| (*s, 0)).collect();
        for record in tables
            .table(kind)
            .values()
            .filter(|r| r.environment == environment)
        {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn retry_candidates(
        &self,
        kind: MessageKind,
        query: &RetryQuery,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let now = Timestamp::now();
        let tables = self.lock_tables()?;
        let mut due: Vec<&MessageRecord> = tables
            .table(kind)
            .values()
            .filter(|r| query.matches(r, &now))
            .collect();
        due.sort_by(|a, b| a.create_time.cmp(&b.create_time));
        Ok(due.into_iter().take(query.batch_size).cloned().collect())
    }

    async fn delete_expired(&self, kind: MessageKind) -> Result<u64, StorageError> {
        let now = Timestamp::now();
        let mut tables = self.lock_tables()?;
        let table = tables.table_mut(kind);
        let before = table.len();
        table.retain(|_, r| !r.is_expired_at(&now));
        Ok((before - table.len()) as u64)
    }
}
