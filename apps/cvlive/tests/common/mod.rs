//! Shared fixtures: a scripted in-process compute service and a small
//! operation registry.

#![allow(dead_code, clippy::unwrap_used)]

use cvlive::{ComputeService, Evaluation, ServiceError};
use cvlive_core::{
    EvaluationRequest, NodeId, OperationDef, OutputKind, ParamKind, ParamSpec, Registry,
};
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Compute service double.
///
/// Every call succeeds with the locators the request expects, unless the
/// node is scripted to fail. With `hold` set, `evaluate` parks until
/// `release` is notified, so a test can edit the chart mid-flight.
#[derive(Default)]
pub struct FakeService {
    pub calls: AtomicUsize,
    pub saves: AtomicUsize,
    pub evaluated: Mutex<Vec<NodeId>>,
    failing: Mutex<BTreeSet<NodeId>>,
    hold: AtomicBool,
    pub started: Notify,
    pub release: Notify,
}

impl FakeService {
    pub fn fail(&self, node: NodeId) {
        self.failing.lock().unwrap().insert(node);
    }

    pub fn recover(&self, node: NodeId) {
        self.failing.lock().unwrap().remove(&node);
    }

    pub fn hold_calls(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn evaluated(&self) -> Vec<NodeId> {
        self.evaluated.lock().unwrap().clone()
    }
}

impl ComputeService for FakeService {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.evaluated.lock().unwrap().push(request.node);

        if self.hold.load(Ordering::SeqCst) {
            self.started.notify_one();
            self.release.notified().await;
        }

        let fails = self.failing.lock().unwrap().contains(&request.node);
        if fails {
            return Err(ServiceError::Rejected(format!(
                "{} failed for node {}",
                request.operation, request.node
            )));
        }
        Ok(Evaluation {
            outputs: request.output_locators(),
            cache_size: Some(n as u64 * 1000),
        })
    }

    async fn save_structured_data(
        &self,
        payload: &serde_json::Value,
    ) -> Result<String, ServiceError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let bytes = serde_json::to_vec(payload).unwrap();
        Ok(format!("{:016x}", bytes.len() as u64 + 0x1000))
    }

    async fn fetch_registry(&self) -> Result<Registry, ServiceError> {
        Ok(registry())
    }

    async fn clear_cache(&self) -> Result<u64, ServiceError> {
        Ok(0)
    }
}

/// `blur(image, amount=5)`, `filter2d(image, kernel)`, `histogram(image) -> complex`.
pub fn registry() -> Registry {
    Registry::from_definitions([
        OperationDef::new(
            "blur",
            vec![
                ParamSpec::new("image", ParamKind::Image),
                ParamSpec::new("amount", ParamKind::Int).with_default(5),
            ],
        ),
        OperationDef::new(
            "filter2d",
            vec![
                ParamSpec::new("image", ParamKind::Image),
                ParamSpec::new("kernel", ParamKind::Complex),
            ],
        ),
        OperationDef::new("histogram", vec![ParamSpec::new("image", ParamKind::Image)])
            .with_outputs(vec![OutputKind::Complex]),
    ])
    .unwrap()
}
