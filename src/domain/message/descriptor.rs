//! Event naming and handler routing metadata.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::foundation::ValidationError;

/// A domain event that can travel over the bus.
///
/// The stable wire name is produced by a [`NameRuler`]; set `NAME` to pin it
/// independently of the Rust type name.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct OrderPlaced { order_id: u64 }
///
/// impl Event for OrderPlaced {
///     const NAME: Option<&'static str> = Some("orders.placed");
/// }
/// ```
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: Option<&'static str> = None;
}

/// Maps logical event and handler identifiers to stable string keys.
///
/// The keys are used as dedupe keys in storage and as topic/group names by
/// broker adapters, so a rule must be deterministic across nodes.
pub trait NameRuler: Send + Sync {
    fn event_name(&self, type_name: &'static str, explicit: Option<&'static str>) -> String;

    fn handler_name(&self, type_name: &'static str, explicit: Option<&'static str>) -> String;
}

/// Explicit name when given, otherwise the last path segment of the type.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNameRuler;

impl NameRuler for DefaultNameRuler {
    fn event_name(&self, type_name: &'static str, explicit: Option<&'static str>) -> String {
        explicit
            .map(str::to_string)
            .unwrap_or_else(|| short_type_name(type_name).to_string())
    }

    fn handler_name(&self, type_name: &'static str, explicit: Option<&'static str>) -> String {
        explicit
            .map(str::to_string)
            .unwrap_or_else(|| short_type_name(type_name).to_string())
    }
}

/// `my_app::orders::OrderPlaced<T>` -> `OrderPlaced`.
pub fn short_type_name(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

/// Static routing metadata for one consumer of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventHandlerDescriptor {
    pub event_handler_name: String,
    pub event_name: String,
    pub event_type: &'static str,
    pub event_handler_type: &'static str,
}

impl EventHandlerDescriptor {
    pub fn new(
        event_handler_name: impl Into<String>,
        event_name: impl Into<String>,
        event_type: &'static str,
        event_handler_type: &'static str,
    ) -> Result<Self, ValidationError> {
        let event_handler_name = event_handler_name.into();
        let event_name = event_name.into();
        if event_handler_name.trim().is_empty() {
            return Err(ValidationError::empty_field("event_handler_name"));
        }
        if event_name.trim().is_empty() {
            return Err(ValidationError::empty_field("event_name"));
        }
        Ok(Self {
            event_handler_name,
            event_name,
            event_type,
            event_handler_type,
        })
    }

    /// Builds the descriptor for handler type `H` consuming event `E`.
    pub fn of<E: Event, H: 'static>(
        ruler: &dyn NameRuler,
        handler_name: Option<&'static str>,
    ) -> Result<Self, ValidationError> {
        let event_type = std::any::type_name::<E>();
        let handler_type = std::any::type_name::<H>();
        Self::new(
            ruler.handler_name(handler_type, handler_name),
            ruler.event_name(event_type, E::NAME),
            event_type,
            handler_type,
        )
    }
}
