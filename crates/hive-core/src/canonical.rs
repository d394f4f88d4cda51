//! Canonical JSON: a sorted-key recursive serializer reused for both
//! payload hashing and on-wire payload encoding, so a round-trip never
//! perturbs the hash.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Renders `value` with object keys sorted lexically at every depth.
///
/// Arrays keep their order (order is meaningful there); only object key
/// order is normalized, since `serde_json::Value`'s default `Map` is
/// insertion-ordered and two structurally-equal payloads built in a
/// different field order must hash identically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string keys always serialize"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => {
            out.push_str(&other.to_string());
        }
    }
}

/// Lowercase hex SHA-256 digest of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    data_encoding::HEXLOWER.encode(&digest)
}

/// SHA-256 of a value's canonical JSON encoding. This is the "row hash"
/// used to detect local mutations between scans, and the content-hash row
/// id used for append-only tables without a natural key.
pub fn hash_canonical(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(hash_canonical(&a), hash_canonical(&b));
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn nested_objects_are_sorted_recursively() {
        let value = json!({"z": {"y": 1, "x": 2}, "a": [3, {"d": 4, "c": 5}]});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":[3,{"c":5,"d":4}],"z":{"x":2,"y":1}}"#
        );
    }

    #[test]
    fn array_order_is_preserved() {
        let value = json!([3, 1, 2]);
        assert_eq!(canonical_json(&value), "[3,1,2]");
    }
}
