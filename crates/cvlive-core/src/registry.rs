//! # Operation Registry
//!
//! Typed catalogue of the operations the compute service can run.
//!
//! The service describes each operation with a `cname` discriminant per
//! parameter and per output. Those strings are resolved exactly once, here,
//! into the closed `ParamKind` / `OutputKind` enums; nothing downstream
//! dispatches on strings.
//!
//! A malformed entry is a programmer error: it is rejected loudly at load
//! time because a silently-accepted one would corrupt cache keys later.

use crate::{CvliveError, OutputSlot, ParamValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// PARAMETER & OUTPUT KINDS
// =============================================================================

/// The widget/decoder family of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    Float,
    Percent,
    Bool,
    String,
    Select,
    Image,
    Complex,
    Json,
}

impl ParamKind {
    /// Resolve a `cname` discriminant.
    pub fn from_cname(cname: &str) -> Result<Self, CvliveError> {
        match cname {
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "percent" => Ok(Self::Percent),
            "bool" => Ok(Self::Bool),
            "string" => Ok(Self::String),
            "select" => Ok(Self::Select),
            "image" => Ok(Self::Image),
            "complex" => Ok(Self::Complex),
            "json" => Ok(Self::Json),
            other => Err(CvliveError::MalformedRegistry(format!(
                "unknown parameter cname '{}'",
                other
            ))),
        }
    }

    /// The `cname` discriminant for this kind.
    #[must_use]
    pub const fn cname(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Percent => "percent",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Select => "select",
            Self::Image => "image",
            Self::Complex => "complex",
            Self::Json => "json",
        }
    }
}

/// The kind of value an output slot produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// A raster image.
    Image,
    /// Structured data (arrays, matrices, point lists).
    Complex,
}

impl OutputKind {
    /// Resolve a `cname` discriminant.
    pub fn from_cname(cname: &str) -> Result<Self, CvliveError> {
        match cname {
            "image" => Ok(Self::Image),
            "complex" => Ok(Self::Complex),
            other => Err(CvliveError::MalformedRegistry(format!(
                "unknown output cname '{}'",
                other
            ))),
        }
    }

    /// The `cname` discriminant for this kind.
    #[must_use]
    pub const fn cname(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Complex => "complex",
        }
    }

    /// File extension used for cached outputs of this kind.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Image => crate::primitives::IMAGE_EXTENSION,
            Self::Complex => crate::primitives::STRUCTURED_EXTENSION,
        }
    }
}

// =============================================================================
// DEFINITIONS
// =============================================================================

/// One declared parameter of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    /// Initial literal for freshly created nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
    /// Widget hints (min, max, step, title, select options). Opaque to the
    /// engine.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hints: BTreeMap<String, serde_json::Value>,
}

impl ParamSpec {
    /// Create a parameter spec without default or hints.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            hints: BTreeMap::new(),
        }
    }

    /// Attach a default literal.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default = Some(ParamValue::new(value));
        self
    }
}

/// A complete operation definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDef {
    /// Registry key, also the operation-type identifier in cache keys.
    pub name: String,
    /// Human-facing name.
    pub display_name: String,
    /// Ordered parameters.
    pub params: Vec<ParamSpec>,
    /// Ordered outputs; slot `i` is `outputs[i]`.
    pub outputs: Vec<OutputKind>,
}

impl OperationDef {
    /// Create a definition with a single image output.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<ParamSpec>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            params,
            outputs: vec![OutputKind::Image],
        }
    }

    /// Replace the declared outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: Vec<OutputKind>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Look up a parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Output kind for a slot, if declared.
    #[must_use]
    pub fn output(&self, slot: OutputSlot) -> Option<OutputKind> {
        self.outputs.get(slot.index()).copied()
    }

    fn validate(&self) -> Result<(), CvliveError> {
        if self.name.is_empty() {
            return Err(CvliveError::MalformedRegistry(
                "operation with empty name".to_string(),
            ));
        }
        if self.outputs.is_empty() {
            return Err(CvliveError::MalformedRegistry(format!(
                "operation '{}' declares no outputs",
                self.name
            )));
        }

        let mut seen = BTreeSet::new();
        for param in &self.params {
            if param.name.is_empty() {
                return Err(CvliveError::MalformedRegistry(format!(
                    "operation '{}' has a parameter with an empty name",
                    self.name
                )));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(CvliveError::MalformedRegistry(format!(
                    "operation '{}' declares parameter '{}' twice",
                    self.name, param.name
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Validated set of operation definitions, keyed by operation name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Registry {
    operations: BTreeMap<String, OperationDef>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, rejecting malformed or duplicate definitions.
    pub fn from_definitions(
        defs: impl IntoIterator<Item = OperationDef>,
    ) -> Result<Self, CvliveError> {
        let mut operations = BTreeMap::new();
        for def in defs {
            def.validate()?;
            if operations.contains_key(&def.name) {
                return Err(CvliveError::MalformedRegistry(format!(
                    "operation '{}' registered twice",
                    def.name
                )));
            }
            operations.insert(def.name.clone(), def);
        }
        Ok(Self { operations })
    }

    /// Parse the service's `effects.json` document.
    pub fn from_json(json: &str) -> Result<Self, CvliveError> {
        let raw: RawRegistry = serde_json::from_str(json)
            .map_err(|e| CvliveError::SerializationError(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Convert an already-decoded `effects.json` document.
    pub fn from_value(value: serde_json::Value) -> Result<Self, CvliveError> {
        let raw: RawRegistry = serde_json::from_value(value)
            .map_err(|e| CvliveError::SerializationError(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawRegistry) -> Result<Self, CvliveError> {
        let mut defs = Vec::with_capacity(raw.effects.len());
        for (key, effect) in raw.effects {
            defs.push(effect.into_definition(key)?);
        }
        Self::from_definitions(defs)
    }

    /// Look up an operation.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OperationDef> {
        self.operations.get(name)
    }

    /// Look up an operation, failing loudly if it is unknown.
    pub fn require(&self, name: &str) -> Result<&OperationDef, CvliveError> {
        self.get(name)
            .ok_or_else(|| CvliveError::UnknownOperation(name.to_string()))
    }

    /// All definitions in name order.
    pub fn operations(&self) -> impl Iterator<Item = &OperationDef> {
        self.operations.values()
    }

    /// Number of registered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

// =============================================================================
// WIRE FORMAT (effects.json)
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawRegistry {
    effects: BTreeMap<String, RawEffect>,
}

#[derive(Debug, Deserialize)]
struct RawEffect {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    displayname: Option<String>,
    #[serde(default, alias = "args")]
    parameters: Vec<RawParam>,
    #[serde(default, alias = "outputs")]
    output: Vec<RawOutput>,
}

#[derive(Debug, Deserialize)]
struct RawParam {
    name: String,
    cname: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(flatten)]
    hints: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    cname: String,
}

impl RawEffect {
    fn into_definition(self, key: String) -> Result<OperationDef, CvliveError> {
        let name = self.name.unwrap_or(key);
        let display_name = self.displayname.unwrap_or_else(|| name.clone());

        let params = self
            .parameters
            .into_iter()
            .map(|p| {
                Ok(ParamSpec {
                    kind: ParamKind::from_cname(&p.cname)?,
                    name: p.name,
                    default: p.value.map(ParamValue),
                    hints: p.hints,
                })
            })
            .collect::<Result<Vec<_>, CvliveError>>()?;

        let outputs = self
            .output
            .iter()
            .map(|o| OutputKind::from_cname(&o.cname))
            .collect::<Result<Vec<_>, CvliveError>>()?;

        Ok(OperationDef {
            name,
            display_name,
            params,
            outputs,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
