//! # Engine Primitives
//!
//! Hardcoded constants for the cvlive engine.
//!
//! These values are compiled into the binary and shared by the core and the
//! app. Changing `KEY_SCHEMA_VERSION` invalidates every cache key ever issued.

/// Directory (relative to the compute service's static root) holding
/// computed outputs.
pub const CACHE_DIR: &str = "cached";

/// File extension for raster image outputs.
pub const IMAGE_EXTENSION: &str = "png";

/// File extension for structured-data outputs.
pub const STRUCTURED_EXTENSION: &str = "json";

/// Version tag mixed into every cache key.
///
/// Bump this when the key material layout changes.
pub const KEY_SCHEMA_VERSION: u8 = 1;

/// How long a node stays flagged as errored before the flag clears, in
/// milliseconds.
pub const ERROR_FLAG_INTERVAL_MS: u64 = 3000;

// =============================================================================
// CHART FILE LIMITS
// =============================================================================

/// Current chart file format version.
pub const CHART_FORMAT_VERSION: u32 = 1;

/// Maximum chart file size accepted by the loader (16 MB).
pub const MAX_CHART_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Maximum number of nodes in a loaded chart.
pub const MAX_CHART_NODES: usize = 10_000;
