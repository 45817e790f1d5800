//! EventHandler port - business logic invoked for received events.

use async_trait::async_trait;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::domain::foundation::{DomainError, ErrorCode, ValidationError};
use crate::domain::message::{Event, EventHandlerDescriptor, NameRuler};

use super::{MessageSerializer, MessageSerializerExt};

/// Handler for one event type.
///
/// Handlers are invoked at least once per (message, handler); the receive
/// pipeline suppresses replays once a copy has succeeded, but a crash between
/// handling and recording can still cause a second invocation.
///
/// # Example
///
/// ```ignore
/// struct SendReceipt { mailer: Mailer }
///
/// #[async_trait]
/// impl EventHandler<OrderPlaced> for SendReceipt {
///     async fn handle(&self, event: OrderPlaced, _items: &HashMap<String, String>) -> Result<(), DomainError> {
///         self.mailer.receipt(event.order_id).await
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    /// Stable handler name override; defaults to the type name.
    const NAME: Option<&'static str> = None;

    async fn handle(&self, event: E, items: &HashMap<String, String>) -> Result<(), DomainError>;
}

/// Type-erased handler, as stored in the handler registry.
#[async_trait]
pub trait HandlerInvoker: Send + Sync {
    fn descriptor(&self) -> &EventHandlerDescriptor;

    /// Decodes `body` and runs the handler. Decode failures are reported as
    /// `ErrorCode::InvalidEvent`.
    async fn invoke(&self, body: &str, items: &HashMap<String, String>) -> Result<(), DomainError>;
}

/// Binds a typed [`EventHandler`] to the serializer that decodes its events.
pub struct TypedInvoker<E, H> {
    handler: H,
    descriptor: EventHandlerDescriptor,
    serializer: Arc<dyn MessageSerializer>,
    _event: PhantomData<fn() -> E>,
}

impl<E: Event, H: EventHandler<E>> TypedInvoker<E, H> {
    pub fn new(
        handler: H,
        ruler: &dyn NameRuler,
        serializer: Arc<dyn MessageSerializer>,
    ) -> Result<Self, ValidationError> {
        let descriptor = EventHandlerDescriptor::of::<E, H>(ruler, H::NAME)?;
        Ok(Self {
            handler,
            descriptor,
            serializer,
            _event: PhantomData,
        })
    }
}

#[async_trait]
impl<E: Event, H: EventHandler<E>> HandlerInvoker for TypedInvoker<E, H> {
    fn descriptor(&self) -> &EventHandlerDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, body: &str, items: &HashMap<String, String>) -> Result<(), DomainError> {
        let event: E = self.serializer.deserialize(body).map_err(|e| {
            DomainError::new(ErrorCode::InvalidEvent, e.to_string())
                .with_detail("event", self.descriptor.event_name.clone())
        })?;
        self.handler.handle(event, items).await
    }
}
