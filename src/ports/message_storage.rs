//! MessageStorage port - the contract every storage backend satisfies.
//!
//! Published and received records live side by side; operations that apply
//! to both take a [`MessageKind`].
//!
//! ## Atomicity requirements
//!
//! - `try_lock` is a single conditional write (e.g. an `UPDATE ... WHERE
//!   is_locking = false OR lock_end < now` affecting one row). Multiple nodes
//!   race on it and exactly one must win.
//! - `update_status` never moves a record out of `Succeeded` and releases
//!   the lease so the record can be re-queried immediately.
//! - Clients never read-modify-write status or lease fields themselves.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::foundation::{RecordId, Timestamp};
use crate::domain::message::{
    EventHandlerDescriptor, MessageKind, MessageRecord, MessageStatus, NewMessage, StatusUpdate,
};

use super::TransactionContext;

/// Errors raised by storage backends.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate {kind} message '{msg_id}'")]
    Duplicate { kind: MessageKind, msg_id: String },

    #[error("{kind} message {id} not found")]
    NotFound { kind: MessageKind, id: RecordId },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("transaction context is not supported by this storage")]
    UnsupportedTransaction,
}

/// Identity of a message within one partition: the scope every msg id
/// lookup is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageKey<'a> {
    pub environment: &'a str,
    pub event_name: &'a str,
    pub msg_id: &'a str,
}

impl<'a> MessageKey<'a> {
    pub fn new(environment: &'a str, event_name: &'a str, msg_id: &'a str) -> Self {
        Self {
            environment,
            event_name,
            msg_id,
        }
    }

    /// Key of an existing record.
    pub fn of(record: &'a MessageRecord) -> Self {
        Self::new(&record.environment, &record.event_name, &record.msg_id)
    }

    pub fn matches(&self, record: &MessageRecord) -> bool {
        record.msg_id == self.msg_id
            && record.environment == self.environment
            && record.event_name == self.event_name
    }
}

/// Read-side search criteria. Blank names and `MessageStatus::None` match anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub environment: String,
    pub event_name: Option<String>,
    pub event_handler_name: Option<String>,
    pub status: MessageStatus,
}

impl SearchFilter {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            event_name: None,
            event_handler_name: None,
            status: MessageStatus::None,
        }
    }

    pub fn with_event_name(mut self, event_name: Option<&str>) -> Self {
        self.event_name = non_blank(event_name);
        self
    }

    pub fn with_handler_name(mut self, handler_name: Option<&str>) -> Self {
        self.event_handler_name = non_blank(handler_name);
        self
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn matches(&self, record: &MessageRecord) -> bool {
        record.environment == self.environment
            && self
                .event_name
                .as_ref()
                .map_or(true, |name| &record.event_name == name)
            && self
                .event_handler_name
                .as_ref()
                .map_or(true, |name| record.event_handler_name.as_ref() == Some(name))
            && (self.status.is_any() || record.status == self.status)
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parameters of a retry-candidate poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryQuery {
    /// Maximum number of records returned.
    pub batch_size: usize,
    /// Minimum record age before it is eligible.
    pub older_than_secs: u64,
    /// Records with `retry_count >= max_retry_count` are excluded.
    pub max_retry_count: u32,
    pub environment: String,
}

impl RetryQuery {
    /// Evaluates the candidate predicate for backends that filter in process.
    pub fn matches(&self, record: &MessageRecord, now: &Timestamp) -> bool {
        let cutoff = now.minus_secs(self.older_than_secs);
        record.environment == self.environment
            && record.status.is_retryable()
            && record.retry_count < self.max_retry_count
            && !record.create_time.is_after(&cutoff)
            && record.is_due_at(now)
    }
}

/// Port for durable message records.
#[async_trait]
pub trait MessageStorage: Send + Sync {
    /// Inserts a published record; inside `transaction` when one is given.
    async fn save_published(
        &self,
        message: &NewMessage,
        transaction: Option<&dyn TransactionContext>,
    ) -> Result<RecordId, StorageError>;

    /// Inserts a received record. Unique per (environment, event, handler, msg id).
    async fn save_received(&self, message: &NewMessage) -> Result<RecordId, StorageError>;

    async fn find_by_id(
        &self,
        kind: MessageKind,
        id: &RecordId,
    ) -> Result<Option<MessageRecord>, StorageError>;

    async fn find_published_by_msg_id(
        &self,
        key: MessageKey<'_>,
    ) -> Result<Option<MessageRecord>, StorageError>;

    /// Received lookups key on (environment, event, msg id, handler name).
    async fn find_received_by_msg_id(
        &self,
        key: MessageKey<'_>,
        descriptor: &EventHandlerDescriptor,
    ) -> Result<Option<MessageRecord>, StorageError>;

    /// True once the transaction that wrote the published record committed.
    ///
    /// A rolled-back insert is simply absent, so this stays false.
    async fn is_committed(&self, key: MessageKey<'_>) -> Result<bool, StorageError>;

    /// Acquires the lease iff none is held or the held one has elapsed.
    async fn try_lock(
        &self,
        kind: MessageKind,
        id: &RecordId,
        lock_end: Timestamp,
    ) -> Result<bool, StorageError>;

    /// Terminal write after a send/handle attempt. Releases the lease.
    async fn update_status(
        &self,
        kind: MessageKind,
        id: &RecordId,
        update: StatusUpdate,
    ) -> Result<(), StorageError>;

    /// Newest-first page of records matching `filter`.
    async fn search(
        &self,
        kind: MessageKind,
        filter: &SearchFilter,
        skip: usize,
        take: usize,
    ) -> Result<Vec<MessageRecord>, StorageError>;

    async fn status_counts(
        &self,
        kind: MessageKind,
        environment: &str,
    ) -> Result<HashMap<MessageStatus, u64>, StorageError>;

    /// Oldest-first records due for another attempt.
    async fn retry_candidates(
        &self,
        kind: MessageKind,
        query: &RetryQuery,
    ) -> Result<Vec<MessageRecord>, StorageError>;

    /// Removes `Succeeded` records past their expiry; returns how many.
    ///
    /// `Scheduled` and `Failed` records are never removed, whatever their age.
    async fn delete_expired(&self, kind: MessageKind) -> Result<u64, StorageError>;
}
