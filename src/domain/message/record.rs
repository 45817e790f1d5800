//! The durable message record and the writes allowed against it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{RecordId, Timestamp};

use super::MessageStatus;

/// Which side of the bus a record belongs to.
///
/// Both sides share the record shape; received records additionally carry
/// the name of the handler that owns that copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Published,
    Received,
}

impl MessageKind {
    pub const ALL: [MessageKind; 2] = [MessageKind::Published, MessageKind::Received];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Published => "published",
            MessageKind::Received => "received",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message record that has not been written to storage yet.
///
/// Storage assigns the identity on save and hands back a [`RecordId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub msg_id: String,
    pub environment: String,
    pub event_name: String,
    /// Present only on received records.
    pub event_handler_name: Option<String>,
    pub event_body: String,
    /// Serialized string-keyed extension map.
    pub event_items: String,
    pub create_time: Timestamp,
    pub delay_at: Option<Timestamp>,
    pub expire_time: Option<Timestamp>,
    pub retry_count: u32,
    pub status: MessageStatus,
    pub is_locking: bool,
    pub lock_end: Option<Timestamp>,
}

impl NewMessage {
    /// Creates a `Scheduled` record created now, with no lease held.
    pub fn scheduled(
        environment: impl Into<String>,
        event_name: impl Into<String>,
        msg_id: impl Into<String>,
        event_body: impl Into<String>,
        event_items: impl Into<String>,
    ) -> Self {
        Self {
            msg_id: msg_id.into(),
            environment: environment.into(),
            event_name: event_name.into(),
            event_handler_name: None,
            event_body: event_body.into(),
            event_items: event_items.into(),
            create_time: Timestamp::now(),
            delay_at: None,
            expire_time: None,
            retry_count: 0,
            status: MessageStatus::Scheduled,
            is_locking: false,
            lock_end: None,
        }
    }

    /// Marks this record as owned by the given consumer.
    pub fn for_handler(mut self, handler_name: impl Into<String>) -> Self {
        self.event_handler_name = Some(handler_name.into());
        self
    }

    /// Sets the not-before time.
    pub fn delayed_until(mut self, delay_at: Option<Timestamp>) -> Self {
        self.delay_at = delay_at;
        self
    }

    /// Inserts the record already leased until `lock_end`.
    pub fn leased_until(mut self, lock_end: Timestamp) -> Self {
        self.is_locking = true;
        self.lock_end = Some(lock_end);
        self
    }

    /// Attaches the storage-assigned identity.
    pub fn into_record(self, id: RecordId) -> MessageRecord {
        MessageRecord {
            id,
            msg_id: self.msg_id,
            environment: self.environment,
            event_name: self.event_name,
            event_handler_name: self.event_handler_name,
            event_body: self.event_body,
            event_items: self.event_items,
            create_time: self.create_time,
            delay_at: self.delay_at,
            expire_time: self.expire_time,
            retry_count: self.retry_count,
            status: self.status,
            is_locking: self.is_locking,
            lock_end: self.lock_end,
        }
    }
}

/// A stored message record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: RecordId,
    pub msg_id: String,
    pub environment: String,
    pub event_name: String,
    pub event_handler_name: Option<String>,
    pub event_body: String,
    pub event_items: String,
    pub create_time: Timestamp,
    pub delay_at: Option<Timestamp>,
    pub expire_time: Option<Timestamp>,
    pub retry_count: u32,
    pub status: MessageStatus,
    pub is_locking: bool,
    pub lock_end: Option<Timestamp>,
}

impl MessageRecord {
    /// A lease can be taken when none is held or the held one has elapsed.
    pub fn is_lockable_at(&self, now: &Timestamp) -> bool {
        if !self.is_locking {
            return true;
        }
        match &self.lock_end {
            Some(end) => end.is_before(now),
            None => true,
        }
    }

    /// Whether the not-before time (if any) has been reached.
    pub fn is_due_at(&self, now: &Timestamp) -> bool {
        self.delay_at.map_or(true, |at| !at.is_after(now))
    }

    /// Whether the expiry coordinator may remove this record.
    pub fn is_expired_at(&self, now: &Timestamp) -> bool {
        self.status == MessageStatus::Succeeded
            && self.expire_time.map_or(false, |at| at.is_before(now))
    }
}

/// The terminal write applied after a send or handle attempt.
///
/// Construction enforces that an expiry time accompanies `Succeeded` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    status: MessageStatus,
    retry_count: u32,
    expire_time: Option<Timestamp>,
}

impl StatusUpdate {
    pub fn succeeded(retry_count: u32, expire_time: Timestamp) -> Self {
        Self {
            status: MessageStatus::Succeeded,
            retry_count,
            expire_time: Some(expire_time),
        }
    }

    pub fn failed(retry_count: u32) -> Self {
        Self {
            status: MessageStatus::Failed,
            retry_count,
            expire_time: None,
        }
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn expire_time(&self) -> Option<Timestamp> {
        self.expire_time
    }
}
