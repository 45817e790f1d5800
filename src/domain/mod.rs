//! Domain layer containing the bus vocabulary.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (identifiers, timestamps, errors, state machines)
//! - `message` - Message record, delivery status, wire envelope, handler descriptors

pub mod foundation;
pub mod message;
