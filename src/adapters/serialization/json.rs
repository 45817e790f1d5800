//! JSON implementation of MessageSerializer.

use serde_json::Value;

use crate::ports::{MessageSerializer, SerializationError};

/// serde_json backed serializer; the default wire and storage format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageSerializer;

impl JsonMessageSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl MessageSerializer for JsonMessageSerializer {
    fn serialize_value(&self, value: &Value) -> Result<String, SerializationError> {
        serde_json::to_string(value).map_err(|e| SerializationError::Encode(e.to_string()))
    }

    fn deserialize_value(&self, text: &str) -> Result<Value, SerializationError> {
        serde_json::from_str(text).map_err(|e| SerializationError::Decode(e.to_string()))
    }

    fn value_to_bytes(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(value).map_err(|e| SerializationError::Encode(e.to_string()))
    }

    fn value_from_bytes(&self, bytes: &[u8]) -> Result<Value, SerializationError> {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::Decode(e.to_string()))
    }
}
