//! # Compute Service
//!
//! The boundary to the external service that runs image operations.
//!
//! `ComputeService` is the seam the driver is written against;
//! `HttpComputeService` speaks the service's HTTP protocol:
//!
//! - `GET  /cv/imagegen?p=<base64 JSON>` evaluates one operation
//! - `POST /cv/complex` saves a structured-data payload
//! - `GET  /cv/effects.json` lists the available operations
//! - `POST /cv/clearCache` empties the result cache
//!
//! The service is expected to cache by hash itself, so repeating a request
//! with the same key is harmless.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cvlive_core::{CvliveError, EvaluationRequest, Locator, ParamValue, Registry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors from the compute service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service could not be reached.
    #[error("Cannot connect to compute service: {0}")]
    ConnectionFailed(String),

    /// The service answered with a non-200 status.
    #[error("Compute service returned HTTP {0}")]
    Status(u16),

    /// The service reported an application-level failure.
    #[error("{0}")]
    Rejected(String),

    /// The response body could not be decoded.
    #[error("Invalid compute service response: {0}")]
    ParseError(String),

    /// The service sent something the engine refuses to work with.
    #[error(transparent)]
    Engine(#[from] CvliveError),
}

impl From<ServiceError> for CvliveError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Engine(e) => e,
            other => CvliveError::IoError(other.to_string()),
        }
    }
}

// =============================================================================
// SERVICE TRAIT
// =============================================================================

/// Successful evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Output locators, one per declared slot.
    pub outputs: Vec<Locator>,
    /// Service-side cache size reported with the response.
    pub cache_size: Option<u64>,
}

/// A compute backend.
pub trait ComputeService: Send + Sync + 'static {
    /// Evaluate one operation.
    fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> impl Future<Output = Result<Evaluation, ServiceError>> + Send;

    /// Store a structured payload; returns its content hash.
    fn save_structured_data(
        &self,
        payload: &serde_json::Value,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;

    /// Fetch the operation registry.
    fn fetch_registry(&self) -> impl Future<Output = Result<Registry, ServiceError>> + Send;

    /// Empty the service's result cache; returns the new cache size.
    fn clear_cache(&self) -> impl Future<Output = Result<u64, ServiceError>> + Send;
}

// =============================================================================
// ERROR MESSAGE MAPPING
// =============================================================================

/// Known backend diagnostics: (library marker, error code, friendly text).
const KNOWN_ERRORS: &[(&str, &str, &str)] = &[(
    "OpenCV",
    "-209:",
    "Array shapes of inputs do not match. (Usually size, or color vs grayscale)",
)];

/// Rewrite a known backend diagnostic into friendly text.
///
/// The marker and the code must appear on the same line, marker first.
#[must_use]
pub fn friendly_message(message: &str) -> String {
    for (library, code, friendly) in KNOWN_ERRORS {
        let known = message.lines().any(|line| {
            line.find(library)
                .is_some_and(|pos| line[pos..].contains(code))
        });
        if known {
            return (*friendly).to_string();
        }
    }
    message.to_string()
}

// =============================================================================
// WIRE FORMAT
// =============================================================================

#[derive(Serialize)]
struct WireRequest<'a> {
    effect: &'a str,
    args: &'a BTreeMap<String, ParamValue>,
    dependencies: &'a BTreeMap<String, Locator>,
    outputs: Vec<WireOutput<'a>>,
    hash: String,
}

#[derive(Serialize)]
struct WireOutput<'a> {
    uuid: String,
    path: &'a Locator,
    cname: &'static str,
    idx: u32,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    success: serde_json::Value,
    #[serde(default)]
    cachesize: Option<u64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    outputs: Option<Vec<Locator>>,
    #[serde(default)]
    hash: Option<String>,
}

impl WireResponse {
    /// `success` is `1`/`0` from the service; booleans are accepted too.
    fn succeeded(&self) -> bool {
        match &self.success {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_i64() != Some(0),
            serde_json::Value::Null => true,
            _ => false,
        }
    }

    fn rejection(&self) -> ServiceError {
        ServiceError::Rejected(friendly_message(
            self.message.as_deref().unwrap_or("Unknown compute error"),
        ))
    }
}

/// Encode an evaluation request as the `p` query parameter.
fn encode_request(request: &EvaluationRequest) -> Result<String, ServiceError> {
    let wire = WireRequest {
        effect: &request.operation,
        args: &request.args,
        dependencies: &request.dependencies,
        outputs: request
            .outputs
            .iter()
            .map(|o| WireOutput {
                uuid: request.node.0.to_string(),
                path: &o.locator,
                cname: o.kind.cname(),
                idx: o.slot.0,
            })
            .collect(),
        hash: request.key.to_hex(),
    };
    let json = serde_json::to_vec(&wire)
        .map_err(|e| ServiceError::Engine(CvliveError::SerializationError(e.to_string())))?;
    Ok(BASE64.encode(json))
}

// =============================================================================
// HTTP IMPLEMENTATION
// =============================================================================

/// `ComputeService` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpComputeService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpComputeService {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<WireResponse, ServiceError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ServiceError::ConnectionFailed(format!("{}: {}", self.base_url, e)))?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(ServiceError::Status(status.as_u16()));
        }
        resp.json::<WireResponse>()
            .await
            .map_err(|e| ServiceError::ParseError(e.to_string()))
    }
}

impl ComputeService for HttpComputeService {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, ServiceError> {
        let encoded = encode_request(request)?;
        let req = self
            .http
            .get(self.url("/cv/imagegen"))
            .query(&[("p", encoded)]);
        let resp = self.send(req).await?;
        if !resp.succeeded() {
            return Err(resp.rejection());
        }
        let outputs = match resp.outputs {
            Some(outputs) if outputs.len() == request.outputs.len() => outputs,
            _ => request.output_locators(),
        };
        Ok(Evaluation {
            outputs,
            cache_size: resp.cachesize,
        })
    }

    async fn save_structured_data(&self, payload: &serde_json::Value) -> Result<String, ServiceError> {
        let req = self.http.post(self.url("/cv/complex")).json(payload);
        let resp = self.send(req).await?;
        if !resp.succeeded() {
            return Err(resp.rejection());
        }
        resp.hash
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ServiceError::ParseError("missing hash for saved payload".to_string()))
    }

    async fn fetch_registry(&self) -> Result<Registry, ServiceError> {
        let resp = self
            .http
            .get(self.url("/cv/effects.json"))
            .send()
            .await
            .map_err(|e| ServiceError::ConnectionFailed(format!("{}: {}", self.base_url, e)))?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(ServiceError::Status(status.as_u16()));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| ServiceError::ParseError(e.to_string()))?;
        Ok(Registry::from_json(&text)?)
    }

    async fn clear_cache(&self) -> Result<u64, ServiceError> {
        let resp = self.send(self.http.post(self.url("/cv/clearCache"))).await?;
        Ok(resp.cachesize.unwrap_or(0))
    }
}

// =============================================================================
// TESTS
// =============================================================================
