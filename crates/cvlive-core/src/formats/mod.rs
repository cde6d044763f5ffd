//! # Formats
//!
//! On-disk representations of a chart. File I/O lives in the app layer.

pub mod chart;

pub use chart::{ChartFile, chart_from_json, chart_to_json};
