//! HTTP adapters - REST API implementations.

pub mod read_api;

pub use read_api::{read_api_router, ReadApiState};
