//! # Evaluation Driver
//!
//! Runs evaluation passes against the compute service. This is the only
//! engine component that performs asynchronous work.
//!
//! A pass:
//! 1. saves structured sources whose payload has no saved locator yet,
//! 2. computes the ready order and clears results of excluded nodes,
//! 3. walks the ready order strictly sequentially, one remote call at a
//!    time, registering each node's result in a pass-local dependency map.
//!
//! Passes may overlap (every edit can request one). Remote calls are still
//! serialized engine-wide by `gate`, and the session lock is never held
//! across an await. A result is committed only if the node's revision and
//! in-flight key are unchanged; otherwise it is discarded as superseded.
//!
//! Remote failures are reported to the sinks and never abort the pass. A
//! failure of a superseded request is discarded like a stale result.
//! Only programmer errors (unknown operation, undeclared output slot) do.

use crate::chart_file;
use crate::service::ComputeService;
use crate::sink::ResultSink;
use cvlive_core::{
    CvliveError, DependencyMap, NodeId, NodeState, Preparation, ReadinessAnalyzer, SavedPayload,
    Session, prepare, structured_locator,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

// =============================================================================
// PASS REPORT
// =============================================================================

/// What happened to one node during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum NodeOutcome {
    /// The stored key matched; no remote call.
    CachedHit,
    /// Computed and committed.
    Computed,
    /// The compute service rejected the node (or a structured save failed).
    Errored(String),
    /// A dependency had no result in this pass.
    Blocked,
    /// The node was edited or removed while its request was being prepared
    /// or was in flight; the result was discarded.
    Superseded,
}

/// Summary of one pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    /// Sequence number of the pass, starting at 1.
    pub pass: u64,
    /// Outcome per visited node, in visiting order.
    pub outcomes: Vec<(NodeId, NodeOutcome)>,
    /// Excluded nodes whose results were cleared.
    pub invalidated: Vec<NodeId>,
    /// Operation nodes with an unsatisfied parameter.
    pub unsatisfied: Vec<NodeId>,
    /// Well-formed nodes that are cyclic or wait on excluded nodes.
    pub unresolved: Vec<NodeId>,
    /// Remote `evaluate` calls made.
    pub calls: usize,
}

impl PassReport {
    /// Outcome recorded for a node, if it was visited.
    #[must_use]
    pub fn outcome(&self, node: NodeId) -> Option<&NodeOutcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|(id, _)| *id == node)
            .map(|(_, o)| o)
    }

    /// Number of nodes that ended with the given outcome kind.
    #[must_use]
    pub fn count(&self, pred: impl Fn(&NodeOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

// =============================================================================
// DRIVER
// =============================================================================

/// The evaluation driver.
pub struct Driver<S> {
    session: Arc<RwLock<Session>>,
    service: Arc<S>,
    sinks: Vec<Arc<dyn ResultSink>>,
    gate: Mutex<()>,
    passes: AtomicU64,
    chart_path: Option<PathBuf>,
}

impl<S: ComputeService> Driver<S> {
    /// Create a driver over a shared session.
    #[must_use]
    pub fn new(session: Arc<RwLock<Session>>, service: Arc<S>) -> Self {
        Self {
            session,
            service,
            sinks: Vec::new(),
            gate: Mutex::new(()),
            passes: AtomicU64::new(0),
            chart_path: None,
        }
    }

    /// Attach a result sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Persist the chart to `path` after every pass.
    #[must_use]
    pub fn with_chart_path(mut self, path: PathBuf) -> Self {
        self.chart_path = Some(path);
        self
    }

    /// The shared session.
    #[must_use]
    pub fn session(&self) -> &Arc<RwLock<Session>> {
        &self.session
    }

    /// The compute service.
    #[must_use]
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    fn notify(&self, f: impl Fn(&dyn ResultSink)) {
        for sink in &self.sinks {
            f(sink.as_ref());
        }
    }

    /// Request a pass without waiting for it.
    ///
    /// A fatal pass error is logged; there is nobody to return it to.
    pub fn request_pass(self: &Arc<Self>) -> JoinHandle<()> {
        let driver = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = driver.run_pass().await {
                tracing::error!(event = "pass_aborted", error = %e, "evaluation pass aborted");
            }
        })
    }

    /// Run one full evaluation pass.
    pub async fn run_pass(&self) -> Result<PassReport, CvliveError> {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let mut report = PassReport {
            pass,
            ..PassReport::default()
        };
        tracing::debug!(event = "pass_started", pass, "evaluation pass started");

        self.save_structured_sources(&mut report).await;

        let (order, mut deps) = {
            let mut session = self.session.write().await;
            let readiness = ReadinessAnalyzer::compute_ready_order(session.graph());
            report.invalidated = readiness.invalidate(session.graph_mut());
            report.unsatisfied = readiness.unsatisfied.iter().copied().collect();
            report.unresolved = readiness.unresolved.iter().copied().collect();
            let deps = DependencyMap::seed(session.graph());
            (readiness.order, deps)
        };

        for &id in &report.invalidated {
            self.notify(|s| s.on_node_cleared(id));
        }
        for &id in &report.unsatisfied {
            self.notify(|s| s.on_node_state(id, NodeState::Unsatisfied));
        }
        for &id in &report.unresolved {
            self.notify(|s| s.on_node_state(id, NodeState::Unresolved));
        }

        for id in order {
            let outcome = self.evaluate_node(id, &mut deps, &mut report).await?;
            report.outcomes.push((id, outcome));
        }

        if let Some(path) = &self.chart_path {
            // Overlapping passes share the temp file.
            let _gate = self.gate.lock().await;
            let session = self.session.read().await;
            if let Err(e) = chart_file::save(path, session.graph()) {
                tracing::warn!(event = "chart_save_failed", error = %e, "could not save chart");
            }
        }

        tracing::info!(
            event = "pass_finished",
            pass,
            calls = report.calls,
            computed = report.count(|o| *o == NodeOutcome::Computed),
            errored = report.count(|o| matches!(o, NodeOutcome::Errored(_))),
            blocked = report.count(|o| *o == NodeOutcome::Blocked),
            "evaluation pass finished"
        );
        Ok(report)
    }

    /// Round-trip unsaved structured payloads through the service.
    async fn save_structured_sources(&self, report: &mut PassReport) {
        let unsaved = self.session.read().await.graph().unsaved_structured();

        for (id, payload) in unsaved {
            let _gate = self.gate.lock().await;
            match self.service.save_structured_data(&payload).await {
                Ok(hash) => {
                    let record = SavedPayload {
                        locator: structured_locator(&hash),
                        hash,
                    };
                    let applied = self
                        .session
                        .write()
                        .await
                        .graph_mut()
                        .mark_structured_saved(id, &payload, record);
                    if !applied {
                        tracing::debug!(node = %id, "structured payload changed during save");
                        report.outcomes.push((id, NodeOutcome::Superseded));
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    self.notify(|s| s.on_node_error(id, &message));
                    report.outcomes.push((id, NodeOutcome::Errored(message)));
                }
            }
        }
    }

    /// Prepare, dispatch and commit one ready node.
    async fn evaluate_node(
        &self,
        id: NodeId,
        deps: &mut DependencyMap,
        report: &mut PassReport,
    ) -> Result<NodeOutcome, CvliveError> {
        let _gate = self.gate.lock().await;

        let request = {
            let mut session = self.session.write().await;
            let prepared = match prepare(&session, id, deps) {
                Ok(p) => p,
                Err(e) if e.is_fatal() => return Err(e),
                // Removed or replaced since readiness was computed.
                Err(_) => return Ok(NodeOutcome::Superseded),
            };
            match prepared {
                Preparation::Blocked => return Ok(NodeOutcome::Blocked),
                Preparation::CacheHit { key, outputs } => {
                    deps.register(id, key, outputs);
                    drop(session);
                    self.notify(|s| s.on_node_state(id, NodeState::CachedHit));
                    return Ok(NodeOutcome::CachedHit);
                }
                Preparation::Ready(request) => {
                    if !session
                        .graph_mut()
                        .mark_dispatched(id, request.revision, request.key)
                    {
                        return Ok(NodeOutcome::Superseded);
                    }
                    request
                }
            }
        };

        self.notify(|s| s.on_node_state(id, NodeState::Computing));
        tracing::debug!(node = %id, key = %request.key, operation = %request.operation, "dispatching");
        report.calls += 1;

        match self.service.evaluate(&request).await {
            Ok(evaluation) => {
                if let Some(bytes) = evaluation.cache_size {
                    self.notify(|s| s.on_cache_size(bytes));
                }
                let committed = {
                    let mut session = self.session.write().await;
                    let graph = session.graph_mut();
                    let ok = graph.commit_result(
                        id,
                        request.revision,
                        request.key,
                        evaluation.outputs.clone(),
                    );
                    if !ok {
                        graph.abandon_dispatch(id, request.revision, request.key);
                    }
                    ok
                };
                if !committed {
                    tracing::debug!(node = %id, key = %request.key, "stale result discarded");
                    return Ok(NodeOutcome::Superseded);
                }
                deps.register(id, request.key, evaluation.outputs.clone());
                self.notify(|s| s.on_node_computed(id, &evaluation.outputs));
                Ok(NodeOutcome::Computed)
            }
            Err(e) => {
                let current = self.session.write().await.graph_mut().abandon_dispatch(
                    id,
                    request.revision,
                    request.key,
                );
                if !current {
                    tracing::debug!(node = %id, key = %request.key, error = %e, "stale failure discarded");
                    return Ok(NodeOutcome::Superseded);
                }
                let message = e.to_string();
                self.notify(|s| s.on_node_error(id, &message));
                Ok(NodeOutcome::Errored(message))
            }
        }
    }
}
