//! Message delivery status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{StateMachine, ValidationError};

/// Delivery status of a published or received message record.
///
/// `None` is never persisted; read-side filters use it to mean "any status".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum MessageStatus {
    #[default]
    None,
    Scheduled,
    Succeeded,
    Failed,
}

impl MessageStatus {
    /// Statuses a stored record can hold, in display order.
    pub const STORED: [MessageStatus; 3] = [
        MessageStatus::Scheduled,
        MessageStatus::Succeeded,
        MessageStatus::Failed,
    ];

    /// Whether the retry coordinator may pick up a record in this status.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MessageStatus::Scheduled | MessageStatus::Failed)
    }

    /// Whether this value filters nothing when used as a search criterion.
    pub fn is_any(&self) -> bool {
        matches!(self, MessageStatus::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::None => "None",
            MessageStatus::Scheduled => "Scheduled",
            MessageStatus::Succeeded => "Succeeded",
            MessageStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(MessageStatus::None),
            "scheduled" => Ok(MessageStatus::Scheduled),
            "succeeded" => Ok(MessageStatus::Succeeded),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

impl StateMachine for MessageStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    fn valid_transitions(&self) -> Vec<Self> {
        match self {
            MessageStatus::None => vec![MessageStatus::Scheduled],
            MessageStatus::Scheduled | MessageStatus::Failed => {
                vec![MessageStatus::Succeeded, MessageStatus::Failed]
            }
            MessageStatus::Succeeded => vec![],
        }
    }
}
