//! HTTP handlers for the read API.
//!
//! Thin translation between axum extractors and `MessageQueries`.

use std::sync::Arc;

use axum::extract::{Json, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::application::{
    MessagePage, MessageQueries, MessageQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
use crate::domain::foundation::RecordId;
use crate::domain::message::{MessageKind, MessageStatus};
use crate::ports::StorageError;

use super::dto::{ErrorResponse, MessageSearchParams, RetryRequest, RetryResponse, RetryResultView};

// ════════════════════════════════════════════════════════════════════════════════
// Error Type
// ════════════════════════════════════════════════════════════════════════════════

/// Read API error that implements IntoResponse.
#[derive(Debug)]
pub enum ReadApiError {
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ReadApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error) = match self {
            ReadApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::bad_request(msg))
            }
            ReadApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorResponse::unavailable(msg))
            }
            ReadApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::internal(msg))
            }
        };
        (status, Json(error)).into_response()
    }
}

impl From<StorageError> for ReadApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Read API storage unavailable");
                ReadApiError::Unavailable(msg)
            }
            other => {
                tracing::error!(error = %other, "Read API storage failure");
                ReadApiError::Internal(other.to_string())
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// State
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct ReadApiState {
    pub queries: Arc<MessageQueries>,
}

impl ReadApiState {
    pub fn new(queries: Arc<MessageQueries>) -> Self {
        Self { queries }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Handlers
// ════════════════════════════════════════════════════════════════════════════════

/// GET /api/published
pub async fn search_published(
    State(state): State<ReadApiState>,
    Query(params): Query<MessageSearchParams>,
) -> Result<Json<MessagePage>, ReadApiError> {
    search(&state, MessageKind::Published, params).await
}

/// GET /api/received
pub async fn search_received(
    State(state): State<ReadApiState>,
    Query(params): Query<MessageSearchParams>,
) -> Result<Json<MessagePage>, ReadApiError> {
    search(&state, MessageKind::Received, params).await
}

/// POST /api/published/retry
pub async fn retry_published(
    State(state): State<ReadApiState>,
    Json(request): Json<RetryRequest>,
) -> Result<Json<RetryResponse>, ReadApiError> {
    retry(&state, MessageKind::Published, request).await
}

/// POST /api/received/retry
pub async fn retry_received(
    State(state): State<ReadApiState>,
    Json(request): Json<RetryRequest>,
) -> Result<Json<RetryResponse>, ReadApiError> {
    retry(&state, MessageKind::Received, request).await
}

async fn search(
    state: &ReadApiState,
    kind: MessageKind,
    params: MessageSearchParams,
) -> Result<Json<MessagePage>, ReadApiError> {
    let query = to_query(params)?;
    let page = state.queries.search(kind, &query).await?;
    Ok(Json(page))
}

async fn retry(
    state: &ReadApiState,
    kind: MessageKind,
    request: RetryRequest,
) -> Result<Json<RetryResponse>, ReadApiError> {
    let ids = request
        .ids
        .into_iter()
        .map(RecordId::new)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ReadApiError::BadRequest(e.to_string()))?;

    let results = state
        .queries
        .retry(kind, &ids)
        .await
        .iter()
        .map(|(id, outcome)| RetryResultView::new(id, outcome))
        .collect();

    Ok(Json(RetryResponse { results }))
}

fn to_query(params: MessageSearchParams) -> Result<MessageQuery, ReadApiError> {
    let status = match params.status.as_deref() {
        Some(raw) => raw
            .parse::<MessageStatus>()
            .map_err(|e| ReadApiError::BadRequest(e.to_string()))?,
        None => MessageStatus::None,
    };
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size > MAX_PAGE_SIZE {
        return Err(ReadApiError::BadRequest(format!(
            "page_size must not exceed {MAX_PAGE_SIZE}"
        )));
    }

    Ok(MessageQuery {
        event_name: non_blank(params.event_name),
        event_handler_name: non_blank(params.event_handler_name),
        status,
        page_index: params.page_index.unwrap_or(1),
        page_size,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
