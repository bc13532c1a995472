//! Canonical, deterministic fingerprint of a payload map (spec.md §4.1).
//!
//! The default strategy re-keys every object (recursively, including
//! objects nested inside arrays) into a `BTreeMap` before serializing, so
//! two payloads that differ only in insertion order of their keys hash to
//! the same digest. `DigestStrategy` is a trait object stored on
//! [`crate::context::EngineContext`] so hosts can swap in a different
//! fingerprint without touching the Synchronizer.

use sha2::{Digest as _, Sha256};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::adapter::Payload;

/// A pure function `payload -> digest`. Implementations MUST be
/// deterministic: same input, same output, across processes and runs.
pub trait DigestStrategy: Send + Sync {
    fn digest(&self, payload: &Payload) -> String;
}

/// SHA-256 over canonical (key-sorted) JSON. The default strategy, and
/// the one `EngineContext::new` wires up unless overridden.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256CanonicalJson;

impl DigestStrategy for Sha256CanonicalJson {
    fn digest(&self, payload: &Payload) -> String {
        let canonical = canonicalize_map(payload);
        let bytes = serde_json::to_vec(&canonical).expect("BTreeMap<String, Value> always serializes");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

fn canonicalize_map(payload: &Payload) -> BTreeMap<String, Value> {
    payload
        .iter()
        .map(|(k, v)| (k.clone(), canonicalize_value(v)))
        .collect()
}

fn canonicalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize_value(v)))
                .collect();
            // serde_json's `Map` preserves insertion order; rebuilding it
            // from the already-sorted BTreeMap makes the insertion order
            // itself canonical.
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, Value)]) -> Payload {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn key_order_does_not_affect_digest() {
        let strategy = Sha256CanonicalJson;
        let p1 = payload(&[("a", json!(1)), ("b", json!("x"))]);
        let p2 = payload(&[("b", json!("x")), ("a", json!(1))]);
        assert_eq!(strategy.digest(&p1), strategy.digest(&p2));
    }

    #[test]
    fn nested_map_key_order_does_not_affect_digest() {
        let strategy = Sha256CanonicalJson;
        let p1 = payload(&[("nested", json!({"x": 1, "y": 2}))]);
        let p2 = payload(&[("nested", json!({"y": 2, "x": 1}))]);
        assert_eq!(strategy.digest(&p1), strategy.digest(&p2));
    }

    #[test]
    fn different_values_differ() {
        let strategy = Sha256CanonicalJson;
        let p1 = payload(&[("a", json!(1))]);
        let p2 = payload(&[("a", json!(2))]);
        assert_ne!(strategy.digest(&p1), strategy.digest(&p2));
    }

    #[test]
    fn booleans_and_numbers_preserved_distinctly() {
        let strategy = Sha256CanonicalJson;
        let p1 = payload(&[("a", json!(true))]);
        let p2 = payload(&[("a", json!(1))]);
        assert_ne!(strategy.digest(&p1), strategy.digest(&p2));
    }

    #[test]
    fn arrays_of_objects_canonicalize_recursively() {
        let strategy = Sha256CanonicalJson;
        let p1 = payload(&[("items", json!([{"x": 1, "y": 2}]))]);
        let p2 = payload(&[("items", json!([{"y": 2, "x": 1}]))]);
        assert_eq!(strategy.digest(&p1), strategy.digest(&p2));
    }
}
