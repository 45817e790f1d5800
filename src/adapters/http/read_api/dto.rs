//! Data Transfer Objects for the read API.
//!
//! `MessagePage` from the application layer is serialized as-is; only the
//! request shapes, the retry report and the error body live here.

use serde::{Deserialize, Serialize};

use crate::application::HandleOutcome;
use crate::domain::foundation::RecordId;

// ════════════════════════════════════════════════════════════════════════════════
// Requests
// ════════════════════════════════════════════════════════════════════════════════

/// Query string of `GET /api/published` and `GET /api/received`.
///
/// `status` stays a string so an unknown value can be reported as 400.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageSearchParams {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub event_handler_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub page_index: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

/// Body of the manual retry endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryRequest {
    pub ids: Vec<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Responses
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct RetryResultView {
    pub id: String,
    pub outcome: String,
    pub success: bool,
    pub delivered: bool,
}

impl RetryResultView {
    pub fn new(id: &RecordId, outcome: &HandleOutcome) -> Self {
        Self {
            id: id.to_string(),
            outcome: outcome.to_string(),
            success: outcome.is_success(),
            delivered: outcome.did_deliver(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryResponse {
    pub results: Vec<RetryResultView>,
}

/// Standard error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            code: "SERVICE_UNAVAILABLE".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            details: None,
        }
    }
}
