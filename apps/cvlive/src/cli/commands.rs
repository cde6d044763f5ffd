//! # CLI Command Implementations

use crate::api::{self, AppState};
use crate::chart_file;
use crate::config::Config;
use crate::driver::{Driver, NodeOutcome, PassReport};
use crate::service::{ComputeService, HttpComputeService};
use crate::sink::{StatusBoard, TracingSink};
use cvlive_core::{
    CvliveError, NodeKind, ReadinessAnalyzer, Registry, Session, dry_run,
    primitives::MAX_CHART_FILE_SIZE,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

fn print_json(value: &impl serde::Serialize) -> Result<(), CvliveError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CvliveError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn http_service(config: &Config) -> Result<HttpComputeService, CvliveError> {
    Ok(HttpComputeService::new(
        config.service_base(),
        config.request_timeout(),
    )?)
}

/// Load the chart and fetch the registry it will be evaluated against.
async fn load_session(
    config: &Config,
    service: &HttpComputeService,
) -> Result<Session, CvliveError> {
    let graph = chart_file::load_or_empty(&config.chart)?;
    let registry = service.fetch_registry().await?;
    tracing::info!(
        chart = %config.chart.display(),
        nodes = graph.len(),
        operations = registry.len(),
        "session loaded"
    );
    Ok(Session::with_graph(graph, registry))
}

fn build_driver(
    config: &Config,
    session: Session,
    service: HttpComputeService,
    board: &StatusBoard,
) -> Driver<HttpComputeService> {
    Driver::new(Arc::new(RwLock::new(session)), Arc::new(service))
        .with_sink(Arc::new(board.clone()))
        .with_sink(Arc::new(TracingSink))
        .with_chart_path(config.chart.clone())
}

// =============================================================================
// SERVE COMMAND
// =============================================================================

/// Start the HTTP API. One pass runs at startup.
pub async fn cmd_serve(config: &Config) -> Result<(), CvliveError> {
    let service = http_service(config)?;
    let session = load_session(config, &service).await?;
    let board = StatusBoard::new(config.error_flag_interval());
    let driver = Arc::new(build_driver(config, session, service, &board));

    println!("cvlive server starting...");
    println!();
    println!("Configuration:");
    println!("  Listen:   {}", config.bind_addr());
    println!("  Service:  {}", config.service_base());
    println!("  Chart:    {}", config.chart.display());
    println!("  Refresh:  {}", if config.auto_refresh { "on edit" } else { "manual" });
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let state = AppState::new(Arc::clone(&driver), board, config.auto_refresh);
    drop(driver.request_pass());
    api::run_server(state, config).await
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Evaluate the chart once and save it.
pub async fn cmd_run(config: &Config, json_mode: bool) -> Result<(), CvliveError> {
    let service = http_service(config)?;
    let session = load_session(config, &service).await?;
    let board = StatusBoard::new(config.error_flag_interval());
    let driver = build_driver(config, session, service, &board);

    let report = driver.run_pass().await?;
    if json_mode {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &PassReport) {
    println!("Evaluation Pass #{}", report.pass);
    println!("==================");
    for (id, outcome) in &report.outcomes {
        let id = id.to_string();
        match outcome {
            NodeOutcome::CachedHit => println!("  {:>6}  cached", id),
            NodeOutcome::Computed => println!("  {:>6}  computed", id),
            NodeOutcome::Errored(message) => println!("  {:>6}  error: {}", id, message),
            NodeOutcome::Blocked => println!("  {:>6}  blocked by failed dependency", id),
            NodeOutcome::Superseded => println!("  {:>6}  superseded", id),
        }
    }
    println!();
    println!("Remote calls: {}", report.calls);
    println!("Unsatisfied:  {}", report.unsatisfied.len());
    println!("Unresolved:   {}", report.unresolved.len());
    println!("Invalidated:  {}", report.invalidated.len());
}

// =============================================================================
// PLAN COMMAND
// =============================================================================

/// Predict a pass: readiness plus the cache key of every ready node.
pub async fn cmd_plan(
    config: &Config,
    registry_file: Option<&Path>,
    json_mode: bool,
) -> Result<(), CvliveError> {
    let registry = match registry_file {
        Some(path) => read_registry(path)?,
        None => http_service(config)?.fetch_registry().await?,
    };
    let graph = chart_file::load_or_empty(&config.chart)?;
    let session = Session::with_graph(graph, registry);
    let plan = dry_run(&session)?;

    if json_mode {
        let output = serde_json::json!({
            "ready": plan.readiness.order,
            "unsatisfied": plan.readiness.unsatisfied,
            "unresolved": plan.readiness.unresolved,
            "nodes": plan.nodes,
            "calls": plan.calls(),
        });
        return print_json(&output);
    }

    println!("Evaluation Plan");
    println!("===============");
    for node in &plan.nodes {
        let key = node.key.map_or_else(|| "-".to_string(), |k| k.to_hex());
        let action = if node.cached { "reuse" } else { "compute" };
        println!(
            "  {:>6}  {:<20} {:<8} {}",
            node.node.to_string(),
            node.operation,
            action,
            key
        );
    }
    println!();
    println!("Remote calls: {}", plan.calls());
    println!("Unsatisfied:  {:?}", plan.readiness.unsatisfied);
    println!("Unresolved:   {:?}", plan.readiness.unresolved);
    Ok(())
}

fn read_registry(path: &Path) -> Result<Registry, CvliveError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CvliveError::IoError(format!("Cannot read '{}': {}", path.display(), e)))?;
    if metadata.len() > MAX_CHART_FILE_SIZE {
        return Err(CvliveError::SerializationError(format!(
            "Registry file size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_CHART_FILE_SIZE
        )));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| CvliveError::IoError(format!("Cannot read '{}': {}", path.display(), e)))?;
    Registry::from_json(&text)
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show which operation nodes of the chart file are ready or excluded.
pub fn cmd_status(config: &Config, json_mode: bool) -> Result<(), CvliveError> {
    let graph = chart_file::load_or_empty(&config.chart)?;
    let readiness = ReadinessAnalyzer::compute_ready_order(&graph);
    let sources = graph.all_nodes().filter(|n| n.is_source()).count();
    let computed = graph
        .all_nodes()
        .filter(|n| matches!(&n.kind, NodeKind::Operation(op) if op.result.is_some()))
        .count();

    if json_mode {
        let output = serde_json::json!({
            "chart": config.chart.to_string_lossy(),
            "nodes": graph.len(),
            "sources": sources,
            "computed": computed,
            "ready": readiness.order,
            "unsatisfied": readiness.unsatisfied,
            "unresolved": readiness.unresolved,
        });
        return print_json(&output);
    }

    println!("cvlive Chart Status");
    println!("===================");
    println!("Chart:       {}", config.chart.display());
    println!();
    println!("Nodes:       {}", graph.len());
    println!("Sources:     {}", sources);
    println!("Computed:    {}", computed);
    println!("Ready:       {}", readiness.order.len());
    println!("Unsatisfied: {}", readiness.unsatisfied.len());
    println!("Unresolved:  {}", readiness.unresolved.len());
    Ok(())
}

// =============================================================================
// SERVICE COMMANDS
// =============================================================================

/// Print the registry the service advertises.
pub async fn cmd_registry(config: &Config, json_mode: bool) -> Result<(), CvliveError> {
    let registry = http_service(config)?.fetch_registry().await?;
    if json_mode {
        return print_json(&registry);
    }
    println!("Operations ({})", registry.len());
    println!("==========");
    for op in registry.operations() {
        let params: Vec<&str> = op.params.iter().map(|p| p.name.as_str()).collect();
        println!(
            "  {:<20} {} [{}] -> {} output(s)",
            op.name,
            op.display_name,
            params.join(", "),
            op.outputs.len()
        );
    }
    Ok(())
}

/// Empty the service's result cache.
pub async fn cmd_clear_cache(config: &Config, json_mode: bool) -> Result<(), CvliveError> {
    let size = http_service(config)?.clear_cache().await?;
    tracing::info!(event = "cache_cleared", cachesize = size, "compute cache cleared");
    if json_mode {
        return print_json(&serde_json::json!({ "cachesize": size }));
    }
    println!("Compute cache cleared ({} bytes remaining)", size);
    Ok(())
}
