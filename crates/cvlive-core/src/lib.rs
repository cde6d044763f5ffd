//! # cvlive-core
//!
//! The incremental evaluation engine for cvlive charts - THE LOGIC.
//!
//! A chart wires source nodes (uploaded images, structured data) into
//! operation nodes. This crate decides which operation nodes are ready,
//! in what order, and whether each one needs a remote computation or can
//! reuse its content-addressed result.
//!
//! ## Architectural Constraints
//!
//! - Synchronous and deterministic: `BTreeMap`/`BTreeSet` only, no clocks,
//!   no randomness.
//! - No async, no network. The app crate drives the compute service and
//!   writes results back through the compare-and-set API on `Graph`.
//! - Recoverable conditions (unsatisfied parameters, cycles) are reported as
//!   data. Only programmer errors surface as `CvliveError`.

// =============================================================================
// MODULES
// =============================================================================

pub mod cache_key;
pub mod formats;
pub mod graph;
pub mod plan;
pub mod primitives;
pub mod readiness;
pub mod registry;
pub mod session;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CacheKey, CvliveError, Locator, NodeId, NodeState, OutputSlot, ParamValue, SourceRef,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use cache_key::{DependencyRef, KeyInput, build_key, output_locator, structured_locator};
pub use graph::{
    Binding, Graph, Node, NodeKind, OperationNode, Parameter, ResultAnnotation, SavedPayload,
    SourcePayload,
};
pub use plan::{
    DependencyMap, DryRun, EvaluationRequest, ExpectedOutput, PlannedNode, Preparation, dry_run,
    prepare,
};
pub use readiness::{Readiness, ReadinessAnalyzer};
pub use registry::{OperationDef, OutputKind, ParamKind, ParamSpec, Registry};
pub use session::Session;

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{ChartFile, chart_from_json, chart_to_json};
