//! Wire envelope placed on the broker.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::domain::foundation::Timestamp;

use super::MessageRecord;

/// Item keys the publisher always writes into the extension map.
pub mod item_keys {
    pub const MSG_ID: &str = "eventbus-msg-id";
    pub const EVENT_NAME: &str = "eventbus-event-name";
    pub const SEND_AT: &str = "eventbus-send-at";
    pub const DELAY_AT: &str = "eventbus-delay-at";
}

/// Self-contained envelope exchanged with the broker.
///
/// Matched back to a message record on the receiving side by `msg_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageTransferModel {
    pub event_name: String,
    pub environment: String,
    pub msg_id: String,
    pub msg_body: String,
    #[serde(default)]
    pub items: HashMap<String, String>,
    pub send_at: Timestamp,
    #[serde(default)]
    pub delay_at: Option<Timestamp>,
}

impl MessageTransferModel {
    /// Rebuilds the envelope for a stored record, using its creation time
    /// as the send time.
    pub fn from_record(record: &MessageRecord, items: HashMap<String, String>) -> Self {
        Self {
            event_name: record.event_name.clone(),
            environment: record.environment.clone(),
            msg_id: record.msg_id.clone(),
            msg_body: record.event_body.clone(),
            items,
            send_at: record.create_time,
            delay_at: record.delay_at,
        }
    }

    /// Whether handling must wait for the delay to elapse.
    pub fn is_delayed(&self) -> bool {
        self.delay_at.map_or(false, |at| !at.has_passed())
    }
}

impl fmt::Display for MessageTransferModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} (env={}, send_at={})",
            self.event_name, self.msg_id, self.environment, self.send_at
        )
    }
}
