//! Operational read API: message search, status counts and manual retry.

mod dto;
mod handlers;
mod routes;

pub use dto::{ErrorResponse, MessageSearchParams, RetryRequest, RetryResponse, RetryResultView};
pub use handlers::{ReadApiError, ReadApiState};
pub use routes::read_api_router;
