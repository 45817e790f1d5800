//! Message module - the durable record, its status machine, the wire
//! envelope and the routing metadata shared by both pipelines.

mod descriptor;
mod record;
mod status;
mod transfer;

pub use descriptor::{
    short_type_name, DefaultNameRuler, Event, EventHandlerDescriptor, NameRuler,
};
pub use record::{MessageKind, MessageRecord, NewMessage, StatusUpdate};
pub use status::MessageStatus;
pub use transfer::{item_keys, MessageTransferModel};
