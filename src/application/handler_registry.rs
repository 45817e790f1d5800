//! HandlerRegistry - event handlers known to this node, keyed by handler name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::foundation::ValidationError;
use crate::domain::message::{Event, EventHandlerDescriptor, NameRuler};
use crate::ports::{EventHandler, HandlerInvoker, MessageSerializer, TypedInvoker};

/// Maps handler names to their invokers.
///
/// The receive retry path resolves a record's handler from its stored
/// `event_handler_name`, so names must be unique across the node.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    invokers: HashMap<String, Arc<dyn HandlerInvoker>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed handler for event `E`.
    pub fn register<E, H>(
        &mut self,
        handler: H,
        ruler: &dyn NameRuler,
        serializer: Arc<dyn MessageSerializer>,
    ) -> Result<EventHandlerDescriptor, ValidationError>
    where
        E: Event,
        H: EventHandler<E>,
    {
        let invoker = TypedInvoker::<E, H>::new(handler, ruler, serializer)?;
        self.register_invoker(Arc::new(invoker))
    }

    /// Registers an already type-erased handler.
    pub fn register_invoker(
        &mut self,
        invoker: Arc<dyn HandlerInvoker>,
    ) -> Result<EventHandlerDescriptor, ValidationError> {
        let descriptor = invoker.descriptor().clone();
        if self.invokers.contains_key(&descriptor.event_handler_name) {
            return Err(ValidationError::invalid_format(
                "event_handler_name",
                format!("handler '{}' is already registered", descriptor.event_handler_name),
            ));
        }
        self.invokers
            .insert(descriptor.event_handler_name.clone(), invoker);
        Ok(descriptor)
    }

    pub fn get(&self, handler_name: &str) -> Option<Arc<dyn HandlerInvoker>> {
        self.invokers.get(handler_name).cloned()
    }

    /// Descriptors sorted by handler name.
    pub fn descriptors(&self) -> Vec<EventHandlerDescriptor> {
        let mut descriptors: Vec<_> = self
            .invokers
            .values()
            .map(|invoker| invoker.descriptor().clone())
            .collect();
        descriptors.sort_by(|a, b| a.event_handler_name.cmp(&b.event_handler_name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.invokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invokers.is_empty()
    }
}
