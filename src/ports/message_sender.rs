//! MessageSender port - outbound broker binding.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::message::MessageTransferModel;

use super::SerializationError;

/// Why a send attempt failed. Every variant is recoverable: the record is
/// marked `Failed` and retried by the coordinator.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker rejected message: {0}")]
    Rejected(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

/// Port for placing envelopes on the broker.
///
/// Implementations route by `message.event_name` and must not return `Ok`
/// before the broker has accepted the message.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &MessageTransferModel) -> Result<(), SendError>;
}
