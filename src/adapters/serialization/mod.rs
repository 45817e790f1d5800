//! Serializer adapters.

mod json;

pub use json::JsonMessageSerializer;
