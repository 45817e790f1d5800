//! Route configuration for the operational read API.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{
    retry_published, retry_received, search_published, search_received, ReadApiState,
};

/// Creates the read API router.
///
/// Routes:
/// - `GET /api/published` - Search published messages with status counts
/// - `GET /api/received` - Search received messages with status counts
/// - `POST /api/published/retry` - Re-send the given published records
/// - `POST /api/received/retry` - Re-handle the given received records
pub fn read_api_router() -> Router<ReadApiState> {
    Router::new()
        .route("/api/published", get(search_published))
        .route("/api/received", get(search_received))
        .route("/api/published/retry", post(retry_published))
        .route("/api/received/retry", post(retry_received))
}
