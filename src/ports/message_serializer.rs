//! MessageSerializer port - text/byte encoding of envelopes and item maps.
//!
//! The trait is object-safe and works on `serde_json::Value`; typed access
//! goes through [`MessageSerializerExt`], which every serializer gets for free.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SerializationError {
    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Port for the bus wire/storage format.
pub trait MessageSerializer: Send + Sync {
    fn serialize_value(&self, value: &Value) -> Result<String, SerializationError>;

    fn deserialize_value(&self, text: &str) -> Result<Value, SerializationError>;

    fn value_to_bytes(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        self.serialize_value(value).map(String::into_bytes)
    }

    fn value_from_bytes(&self, bytes: &[u8]) -> Result<Value, SerializationError> {
        let text =
            std::str::from_utf8(bytes).map_err(|e| SerializationError::Decode(e.to_string()))?;
        self.deserialize_value(text)
    }
}

/// Typed helpers over any [`MessageSerializer`].
pub trait MessageSerializerExt {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, SerializationError>;

    fn deserialize<T: DeserializeOwned>(&self, text: &str) -> Result<T, SerializationError>;

    fn serialize_to_bytes<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, SerializationError>;

    fn deserialize_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError>;
}

impl<S: MessageSerializer + ?Sized> MessageSerializerExt for S {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, SerializationError> {
        let value =
            serde_json::to_value(value).map_err(|e| SerializationError::Encode(e.to_string()))?;
        self.serialize_value(&value)
    }

    fn deserialize<T: DeserializeOwned>(&self, text: &str) -> Result<T, SerializationError> {
        let value = self.deserialize_value(text)?;
        serde_json::from_value(value).map_err(|e| SerializationError::Decode(e.to_string()))
    }

    fn serialize_to_bytes<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, SerializationError> {
        let value =
            serde_json::to_value(value).map_err(|e| SerializationError::Encode(e.to_string()))?;
        self.value_to_bytes(&value)
    }

    fn deserialize_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        let value = self.value_from_bytes(bytes)?;
        serde_json::from_value(value).map_err(|e| SerializationError::Decode(e.to_string()))
    }
}
