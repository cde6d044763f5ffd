//! # Cache Key Builder
//!
//! Derives the content hash identifying one pending evaluation.
//!
//! The key covers, in canonical order:
//! - the key schema version,
//! - the operation-type identifier,
//! - each parameter by lexically sorted name, as either its literal (in
//!   canonical JSON) or a dependency reference.
//!
//! A dependency reference is the locator of a source node, or the result
//! hash plus output slot of an upstream operation. It never contains the
//! upstream value itself, so an unchanged upstream hash yields an unchanged
//! downstream key.
//!
//! Material is encoded with `postcard` and hashed with BLAKE3. Wall-clock
//! time, node ids and insertion order never enter the key.

use crate::primitives::{CACHE_DIR, KEY_SCHEMA_VERSION, STRUCTURED_EXTENSION};
use crate::registry::OutputKind;
use crate::{CacheKey, CvliveError, Locator, OutputSlot, ParamValue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

// =============================================================================
// KEY INPUTS
// =============================================================================

/// How a source-bound parameter is referenced in a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DependencyRef {
    /// A source node's stored content locator.
    Source { locator: Locator },
    /// An upstream operation's result hash and output slot.
    Output { hash: CacheKey, slot: OutputSlot },
}

/// One parameter's contribution to a cache key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyInput {
    Literal(ParamValue),
    Dependency(DependencyRef),
}

#[derive(Serialize)]
enum KeyPart<'a> {
    Literal(String),
    Dependency(&'a DependencyRef),
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    schema: u8,
    operation: &'a str,
    params: Vec<(&'a str, KeyPart<'a>)>,
}

// =============================================================================
// BUILDER
// =============================================================================

/// Build the cache key for an operation with the given parameter inputs.
///
/// `params` is keyed by parameter name; the `BTreeMap` supplies the lexical
/// order.
pub fn build_key(
    operation: &str,
    params: &BTreeMap<String, KeyInput>,
) -> Result<CacheKey, CvliveError> {
    let material = KeyMaterial {
        schema: KEY_SCHEMA_VERSION,
        operation,
        params: params
            .iter()
            .map(|(name, input)| {
                let part = match input {
                    KeyInput::Literal(value) => {
                        let mut canonical = String::new();
                        write_canonical(value.as_json(), &mut canonical);
                        KeyPart::Literal(canonical)
                    }
                    KeyInput::Dependency(dep) => KeyPart::Dependency(dep),
                };
                (name.as_str(), part)
            })
            .collect(),
    };

    let bytes = postcard::to_allocvec(&material)
        .map_err(|e| CvliveError::SerializationError(e.to_string()))?;
    Ok(CacheKey(*blake3::hash(&bytes).as_bytes()))
}

/// Canonical JSON: object keys sorted, no whitespace.
///
/// Independent of whether `serde_json` preserves insertion order.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", serde_json::Value::String(k.clone()));
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}

// =============================================================================
// OUTPUT LOCATORS
// =============================================================================

/// Locator of output `slot` of a computation keyed by `key`:
/// `cached/{key}.{slot}.{png|json}`.
#[must_use]
pub fn output_locator(key: &CacheKey, slot: OutputSlot, kind: OutputKind) -> Locator {
    Locator(format!(
        "{}/{}.{}.{}",
        CACHE_DIR,
        key.to_hex(),
        slot.0,
        kind.extension()
    ))
}

/// Locator of a saved structured payload: `cached/{hash}.json`.
#[must_use]
pub fn structured_locator(hash: &str) -> Locator {
    Locator(format!("{}/{}.{}", CACHE_DIR, hash, STRUCTURED_EXTENSION))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn literal(v: serde_json::Value) -> KeyInput {
        KeyInput::Literal(ParamValue(v))
    }

    fn source(path: &str) -> KeyInput {
        KeyInput::Dependency(DependencyRef::Source {
            locator: Locator::new(path),
        })
    }

    fn blur_inputs(amount: i64) -> BTreeMap<String, KeyInput> {
        let mut params = BTreeMap::new();
        params.insert("amount".to_string(), literal(json!(amount)));
        params.insert("image".to_string(), source("a.png"));
        params
    }

    #[test]
    fn same_inputs_same_key() {
        let a = build_key("blur", &blur_inputs(5)).expect("key");
        let b = build_key("blur", &blur_inputs(5)).expect("key");
        assert_eq!(a, b);
    }

    #[test]
    fn literal_change_changes_key() {
        let a = build_key("blur", &blur_inputs(5)).expect("key");
        let b = build_key("blur", &blur_inputs(7)).expect("key");
        assert_ne!(a, b);
    }

    #[test]
    fn operation_type_is_part_of_key() {
        let a = build_key("blur", &blur_inputs(5)).expect("key");
        let b = build_key("median", &blur_inputs(5)).expect("key");
        assert_ne!(a, b);
    }

    #[test]
    fn dependency_kinds_do_not_collide() {
        let hash = CacheKey([9; 32]);
        let mut via_output = BTreeMap::new();
        via_output.insert(
            "image".to_string(),
            KeyInput::Dependency(DependencyRef::Output {
                hash,
                slot: OutputSlot(0),
            }),
        );
        let mut via_slot1 = BTreeMap::new();
        via_slot1.insert(
            "image".to_string(),
            KeyInput::Dependency(DependencyRef::Output {
                hash,
                slot: OutputSlot(1),
            }),
        );
        let mut via_literal = BTreeMap::new();
        via_literal.insert("image".to_string(), literal(json!(hash.to_hex())));

        let a = build_key("blur", &via_output).expect("key");
        let b = build_key("blur", &via_slot1).expect("key");
        let c = build_key("blur", &via_literal).expect("key");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn object_key_order_is_irrelevant() {
        let mut one = serde_json::Map::new();
        one.insert("b".into(), json!(1));
        one.insert("a".into(), json!([1, {"y": 2, "x": 3}]));
        let mut two = serde_json::Map::new();
        two.insert("a".into(), json!([1, {"x": 3, "y": 2}]));
        two.insert("b".into(), json!(1));

        let mut s1 = String::new();
        write_canonical(&serde_json::Value::Object(one), &mut s1);
        let mut s2 = String::new();
        write_canonical(&serde_json::Value::Object(two), &mut s2);
        assert_eq!(s1, s2);
        assert_eq!(s1, r#"{"a":[1,{"x":3,"y":2}],"b":1}"#);
    }

    #[test]
    fn locators_follow_cache_layout() {
        let key = CacheKey([0xab; 32]);
        let image = output_locator(&key, OutputSlot(0), OutputKind::Image);
        assert_eq!(image.as_str(), format!("cached/{}.0.png", "ab".repeat(32)));
        let data = output_locator(&key, OutputSlot(2), OutputKind::Complex);
        assert!(data.as_str().ends_with(".2.json"));
        assert_eq!(structured_locator("f00").as_str(), "cached/f00.json");
    }
}
