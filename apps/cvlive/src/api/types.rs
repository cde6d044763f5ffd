//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.

use axum::{Json, http::StatusCode, response::IntoResponse};
use cvlive_core::{CvliveError, Locator, NodeId, NodeState, SourceRef};
use serde::{Deserialize, Serialize};

/// Maximum length of a node name or locator accepted by the API.
pub const MAX_NAME_LENGTH: usize = 256;

fn check_length(field: &str, value: &str) -> Result<(), ApiError> {
    if value.len() > MAX_NAME_LENGTH {
        return Err(ApiError::bad_request(format!(
            "{} exceeds {} bytes",
            field, MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// NODE CREATION
// =============================================================================

/// Add an uploaded image as a source node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddImageRequest {
    pub name: String,
    pub locator: String,
}

impl AddImageRequest {
    /// Validate field lengths and return the locator.
    pub fn validate(&self) -> Result<Locator, ApiError> {
        check_length("name", &self.name)?;
        check_length("locator", &self.locator)?;
        if self.locator.is_empty() {
            return Err(ApiError::bad_request("locator must not be empty"));
        }
        Ok(Locator::new(self.locator.clone()))
    }
}

/// Add a structured-data source node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddStructuredRequest {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Add an operation node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOperationRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub operation: String,
}

/// Response for any node creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCreatedResponse {
    pub id: NodeId,
}

/// Response for node removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveNodeResponse {
    pub removed: NodeId,
    /// Nodes whose parameters referenced the removed node.
    pub purged: Vec<NodeId>,
}

// =============================================================================
// EDITS
// =============================================================================

/// Set (or clear, with `null`) a parameter literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetValueRequest {
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// Bind (or unbind, with `null`) a parameter source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSourceRequest {
    #[serde(default)]
    pub source: Option<SourceRef>,
}

/// Replace a structured source's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPayloadRequest {
    pub payload: serde_json::Value,
}

/// Rename a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

/// Generic edit acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditResponse {
    pub success: bool,
    /// Whether an evaluation pass was requested.
    pub refresh_requested: bool,
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Per-node status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusJson {
    pub id: NodeId,
    pub name: String,
    /// `image`, `structured` or `operation`.
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Lifecycle state; absent for source nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<NodeState>,
    pub outputs: Vec<Locator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub flagged: bool,
}

/// Chart status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub nodes: Vec<NodeStatusJson>,
    pub ready: Vec<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<u64>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error mapped to an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// 400 with a message.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<CvliveError> for ApiError {
    fn from(err: CvliveError) -> Self {
        let status = match &err {
            CvliveError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            CvliveError::NotAnOperation(_)
            | CvliveError::NotStructured(_)
            | CvliveError::UnknownParameter { .. }
            | CvliveError::UnknownOperation(_)
            | CvliveError::MissingOutput { .. } => StatusCode::BAD_REQUEST,
            CvliveError::MalformedRegistry(_)
            | CvliveError::SerializationError(_)
            | CvliveError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}
