//! # API Endpoint Handlers
//!
//! Every successful edit requests a new evaluation pass (when auto-refresh
//! is on) without waiting for it. Passes may overlap; the driver discards
//! stale results.

use super::{
    AppState,
    types::{
        AddImageRequest, AddOperationRequest, AddStructuredRequest, ApiError, EditResponse,
        HealthResponse, NodeCreatedResponse, NodeStatusJson, RemoveNodeResponse, RenameRequest,
        SetPayloadRequest, SetSourceRequest, SetValueRequest, StatusResponse, MAX_NAME_LENGTH,
    },
};
use crate::driver::PassReport;
use crate::service::ComputeService;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use cvlive_core::{
    ChartFile, NodeId, NodeKind, NodeState, OperationDef, ParamValue, ReadinessAnalyzer,
    SourcePayload,
};

fn check_name(name: &str) -> Result<(), ApiError> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(ApiError::bad_request(format!(
            "name exceeds {} bytes",
            MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

fn edited<S: ComputeService>(state: &AppState<S>) -> Json<EditResponse> {
    Json(EditResponse {
        success: true,
        refresh_requested: state.after_edit(),
    })
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// READ HANDLERS
// =============================================================================

/// The whole chart in file format.
pub async fn chart_handler<S: ComputeService>(State(state): State<AppState<S>>) -> Json<ChartFile> {
    let session = state.driver.session().read().await;
    Json(ChartFile::from(session.graph()))
}

/// The operation registry.
pub async fn registry_handler<S: ComputeService>(
    State(state): State<AppState<S>>,
) -> Json<Vec<OperationDef>> {
    let session = state.driver.session().read().await;
    Json(session.registry().operations().cloned().collect())
}

/// Per-node status: readiness merged with the latest driver outcomes.
pub async fn status_handler<S: ComputeService>(
    State(state): State<AppState<S>>,
) -> Json<StatusResponse> {
    let board = state.board.snapshot();
    let session = state.driver.session().read().await;
    let graph = session.graph();
    let readiness = ReadinessAnalyzer::compute_ready_order(graph);

    let nodes = graph
        .all_nodes()
        .map(|node| {
            let recorded = board.nodes.get(&node.id);
            let error = recorded.and_then(|s| s.error.clone());
            let flagged = recorded.is_some_and(|s| s.flagged);
            match &node.kind {
                NodeKind::Source(src) => NodeStatusJson {
                    id: node.id,
                    name: node.name.clone(),
                    kind: match src {
                        SourcePayload::Image { .. } => "image",
                        SourcePayload::Structured { .. } => "structured",
                    }
                    .to_string(),
                    operation: None,
                    state: None,
                    outputs: src.locator().cloned().into_iter().collect(),
                    error,
                    flagged,
                },
                NodeKind::Operation(op) => {
                    // Exclusion is current; anything finer comes from the last pass.
                    let state = match readiness.state_of(node.id) {
                        Some(excluded @ (NodeState::Unsatisfied | NodeState::Unresolved)) => {
                            excluded
                        }
                        _ => recorded.map_or(NodeState::Ready, |s| s.state),
                    };
                    NodeStatusJson {
                        id: node.id,
                        name: node.name.clone(),
                        kind: "operation".to_string(),
                        operation: Some(op.operation.clone()),
                        state: Some(state),
                        outputs: op
                            .result
                            .as_ref()
                            .map(|r| r.outputs.clone())
                            .unwrap_or_default(),
                        error,
                        flagged,
                    }
                }
            }
        })
        .collect();

    Json(StatusResponse {
        nodes,
        ready: readiness.order,
        cache_size: board.cache_size,
    })
}

// =============================================================================
// NODE CREATION & REMOVAL
// =============================================================================

/// Add an uploaded-image source.
pub async fn add_image_handler<S: ComputeService>(
    State(state): State<AppState<S>>,
    Json(request): Json<AddImageRequest>,
) -> Result<Json<NodeCreatedResponse>, ApiError> {
    let locator = request.validate()?;
    let id = state
        .driver
        .session()
        .write()
        .await
        .add_image_source(request.name, locator);
    state.after_edit();
    Ok(Json(NodeCreatedResponse { id }))
}

/// Add a structured-data source.
pub async fn add_structured_handler<S: ComputeService>(
    State(state): State<AppState<S>>,
    Json(request): Json<AddStructuredRequest>,
) -> Result<Json<NodeCreatedResponse>, ApiError> {
    check_name(&request.name)?;
    let id = state
        .driver
        .session()
        .write()
        .await
        .add_structured_source(request.name, request.payload);
    state.after_edit();
    Ok(Json(NodeCreatedResponse { id }))
}

/// Add an operation node with its registry defaults.
pub async fn add_operation_handler<S: ComputeService>(
    State(state): State<AppState<S>>,
    Json(request): Json<AddOperationRequest>,
) -> Result<Json<NodeCreatedResponse>, ApiError> {
    if let Some(name) = &request.name {
        check_name(name)?;
    }
    let id = state
        .driver
        .session()
        .write()
        .await
        .add_operation(request.name, &request.operation)?;
    state.after_edit();
    Ok(Json(NodeCreatedResponse { id }))
}

/// Remove a node, purging references to it.
pub async fn remove_node_handler<S: ComputeService>(
    State(state): State<AppState<S>>,
    Path(id): Path<u64>,
) -> Result<Json<RemoveNodeResponse>, ApiError> {
    let id = NodeId(id);
    let (removed, purged) = state.driver.session().write().await.remove_node(id)?;
    state.board.forget(removed.id);
    tracing::info!(node = %id, purged = purged.len(), "node removed");
    state.after_edit();
    Ok(Json(RemoveNodeResponse {
        removed: removed.id,
        purged,
    }))
}

// =============================================================================
// EDIT HANDLERS
// =============================================================================

/// Set or clear a parameter literal.
pub async fn set_value_handler<S: ComputeService>(
    State(state): State<AppState<S>>,
    Path((id, name)): Path<(u64, String)>,
    Json(request): Json<SetValueRequest>,
) -> Result<Json<EditResponse>, ApiError> {
    state.driver.session().write().await.set_parameter_value(
        NodeId(id),
        &name,
        request.value.map(ParamValue),
    )?;
    Ok(edited(&state))
}

/// Bind or unbind a parameter source.
pub async fn set_source_handler<S: ComputeService>(
    State(state): State<AppState<S>>,
    Path((id, name)): Path<(u64, String)>,
    Json(request): Json<SetSourceRequest>,
) -> Result<Json<EditResponse>, ApiError> {
    state
        .driver
        .session()
        .write()
        .await
        .set_parameter_source(NodeId(id), &name, request.source)?;
    Ok(edited(&state))
}

/// Replace a structured source's payload.
pub async fn set_payload_handler<S: ComputeService>(
    State(state): State<AppState<S>>,
    Path(id): Path<u64>,
    Json(request): Json<SetPayloadRequest>,
) -> Result<Json<EditResponse>, ApiError> {
    state
        .driver
        .session()
        .write()
        .await
        .set_structured_payload(NodeId(id), request.payload)?;
    Ok(edited(&state))
}

/// Rename a node. Names never enter cache keys, so no pass is requested.
pub async fn rename_handler<S: ComputeService>(
    State(state): State<AppState<S>>,
    Path(id): Path<u64>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<EditResponse>, ApiError> {
    check_name(&request.name)?;
    state
        .driver
        .session()
        .write()
        .await
        .graph_mut()
        .rename(NodeId(id), request.name)?;
    Ok(Json(EditResponse {
        success: true,
        refresh_requested: false,
    }))
}

// =============================================================================
// REFRESH HANDLER
// =============================================================================

/// Run a pass and wait for its report.
pub async fn refresh_handler<S: ComputeService>(
    State(state): State<AppState<S>>,
) -> Result<Json<PassReport>, ApiError> {
    let report = state.driver.run_pass().await?;
    Ok(Json(report))
}
