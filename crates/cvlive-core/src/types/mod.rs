//! # Core Type Definitions
//!
//! This module contains all core types shared by the cvlive engine:
//! - Graph identifiers (`NodeId`, `OutputSlot`, `SourceRef`)
//! - Parameter literals (`ParamValue`)
//! - Content addressing (`Locator`, `CacheKey`)
//! - Per-node evaluation state (`NodeState`)
//! - Error types (`CvliveError`)
//!
//! ## Determinism Guarantees
//!
//! Identifiers implement `Ord` so every collection keyed by them can be a
//! `BTreeMap`/`BTreeSet` and iterate in a stable order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

// =============================================================================
// GRAPH IDENTIFIERS
// =============================================================================

/// Unique, stable identifier for a node in a chart.
///
/// Identifiers are never reused within a graph and survive save/load, which
/// makes them usable as dependency keys across evaluation passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of an output slot on a node.
///
/// Source nodes expose a single slot (`OutputSlot(0)`); operation nodes
/// expose one slot per output declared by their operation definition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OutputSlot(pub u32);

impl OutputSlot {
    /// Get the slot as a `usize` index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A parameter's pointer at another node's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    /// The upstream node.
    pub node: NodeId,
    /// The output slot on the upstream node.
    pub slot: OutputSlot,
}

impl SourceRef {
    /// Create a new source reference.
    #[must_use]
    pub const fn new(node: NodeId, slot: OutputSlot) -> Self {
        Self { node, slot }
    }
}

// =============================================================================
// PARAMETER LITERALS
// =============================================================================

/// A literal parameter value as entered through the parameter widgets.
///
/// Values are arbitrary JSON (numbers, strings, selects, nested arrays for
/// structured input). Canonical encoding for hashing lives in `cache_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamValue(pub serde_json::Value);

impl ParamValue {
    /// Wrap a JSON value.
    #[must_use]
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        Self(value.into())
    }

    /// Borrow the underlying JSON value.
    #[must_use]
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

// =============================================================================
// CONTENT ADDRESSING
// =============================================================================

/// Content locator of a node output (e.g. `uploads/a.png`,
/// `cached/<hash>.0.png`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(pub String);

impl Locator {
    /// Create a locator from a path-like string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the locator as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 32-byte BLAKE3 digest identifying one pending evaluation.
///
/// Serialized as a 64-character lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(pub [u8; 32]);

impl CacheKey {
    /// Hex-encode the key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(64);
        for &byte in &self.0 {
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0xF) as usize] as char);
        }
        out
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, CvliveError> {
        let bytes = s.as_bytes();
        if bytes.len() != 64 {
            return Err(CvliveError::SerializationError(format!(
                "Cache key must be 64 hex characters, got {}",
                bytes.len()
            )));
        }

        let mut out = [0u8; 32];
        for (i, pair) in bytes.chunks_exact(2).enumerate() {
            let hi = hex_digit(pair[0])?;
            let lo = hex_digit(pair[1])?;
            out[i] = (hi << 4) | lo;
        }
        Ok(Self(out))
    }
}

fn hex_digit(c: u8) -> Result<u8, CvliveError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(CvliveError::SerializationError(format!(
            "Invalid hex digit in cache key: {:?}",
            c as char
        ))),
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.to_hex())
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// NODE STATE
// =============================================================================

/// Where an operation node stands in the evaluation lifecycle.
///
/// `Unsatisfied`/`Unresolved` nodes and `Errored` nodes become `Ready`
/// candidates again on the next pass once their preconditions hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// At least one parameter has neither a literal nor a live source.
    Unsatisfied,
    /// Well-formed, but a dependency is cyclic or unresolved.
    Unresolved,
    /// Admitted to the ready order for the current pass.
    Ready,
    /// A compute request for this node is in flight.
    Computing,
    /// The fresh cache key matched the stored one; no remote call was made.
    CachedHit,
    /// Computed successfully in this pass.
    Computed,
    /// The compute service rejected the request.
    Errored,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the cvlive engine.
///
/// Unsatisfied parameters, cycles and remote failures are not errors; they are
/// reported through readiness sets and the result sink. The variants below are
/// either invalid edit requests or programmer errors that must stop a pass.
#[derive(Debug, Error)]
pub enum CvliveError {
    /// The requested node was not found in the graph.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// The node exists but is not an operation node.
    #[error("Node {0} is not an operation")]
    NotAnOperation(NodeId),

    /// The node exists but is not a structured-data source.
    #[error("Node {0} is not a structured-data source")]
    NotStructured(NodeId),

    /// The operation node has no parameter with this name.
    #[error("Node {node} has no parameter named '{name}'")]
    UnknownParameter { node: NodeId, name: String },

    /// The operation type is not present in the registry.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// A registry entry is malformed (duplicate names, no outputs, bad cname).
    #[error("Malformed registry entry: {0}")]
    MalformedRegistry(String),

    /// A source reference points at an output slot that does not exist.
    #[error("Node {node} has no output descriptor for slot {}", slot.0)]
    MissingOutput { node: NodeId, slot: OutputSlot },

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl CvliveError {
    /// Whether this error belongs to the programmer-error class that must
    /// abort an evaluation pass rather than be reported per node.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownOperation(_) | Self::MalformedRegistry(_) | Self::MissingOutput { .. }
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
