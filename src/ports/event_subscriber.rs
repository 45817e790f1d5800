//! EventSubscriber port - inbound broker binding.
//!
//! A subscriber runs one consume loop per listener. Each decoded envelope is
//! handed to the listener on its own task so a slow handler does not stall
//! the loop; progress is acknowledged only after the listener returns `Ok`.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::domain::message::{EventHandlerDescriptor, MessageTransferModel};

use super::{SerializationError, StorageError};

/// Errors returned by a listener. The subscriber must not acknowledge the
/// message, so the broker redelivers it.
#[derive(Debug, Clone, Error)]
pub enum ReceiveError {
    #[error("failed to record received message: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

/// Errors that end a consume loop.
#[derive(Debug, Clone, Error)]
pub enum SubscribeError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("subscription closed: {0}")]
    Closed(String),
}

/// Receives envelopes for exactly one handler descriptor.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Routing metadata: the subscriber consumes `event_name` on behalf of
    /// `event_handler_name`.
    fn descriptor(&self) -> &EventHandlerDescriptor;

    async fn on_receive(&self, message: MessageTransferModel) -> Result<(), ReceiveError>;
}

/// Port for consuming envelopes from the broker.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Runs the consume loop for `listener` until `shutdown` turns true.
    ///
    /// Messages already handed to the listener finish on their own tasks.
    async fn subscribe(
        &self,
        listener: Arc<dyn MessageListener>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), SubscribeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_listener_object_safe(_: &dyn MessageListener) {}

    #[allow(dead_code)]
    fn assert_subscriber_object_safe(_: &dyn EventSubscriber) {}

    #[test]
    fn storage_failures_surface_as_receive_errors() {
        let err: ReceiveError = StorageError::Unavailable("down".into()).into();
        assert_eq!(
            err.to_string(),
            "failed to record received message: storage unavailable: down"
        );
    }
}
