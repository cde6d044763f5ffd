//! # cvlive
//!
//! The asynchronous half of cvlive: the evaluation driver, the compute
//! service client, result sinks and the outer surfaces (HTTP API, CLI).
//!
//! ```text
//!   CLI (clap) ──┐
//!                ├──> Driver ──> ComputeService (HTTP)
//!   HTTP API ────┘       │
//!   (axum)               ├──> ResultSink (StatusBoard, TracingSink)
//!                        ▼
//!                  cvlive-core (Session, readiness, cache keys)
//! ```

pub mod api;
pub mod chart_file;
pub mod cli;
pub mod config;
pub mod driver;
pub mod service;
pub mod sink;

pub use config::Config;
pub use driver::{Driver, NodeOutcome, PassReport};
pub use service::{ComputeService, Evaluation, HttpComputeService, ServiceError};
pub use sink::{BoardSnapshot, NodeStatus, ResultSink, StatusBoard, TracingSink};
