//! Canonical JSON encoding, hashing, and content addressing.
//!
//! Two instances given semantically equal records must produce byte-identical
//! canonical encodings: object keys sorted lexicographically, array order
//! preserved, no insignificant whitespace, UTF-8, shortest exact decimal form
//! for numbers. Content identifiers are `cid_` followed by the hex SHA-256 of
//! the canonical bytes.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{ServiceError, ServiceResult};

/// Produce the canonical byte encoding of a serializable record.
pub fn canonical_bytes<T: Serialize>(record: &T) -> ServiceResult<Vec<u8>> {
    let value = serde_json::to_value(record)
        .map_err(|e| ServiceError::Internal(format!("canonicalization failed: {}", e)))?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out.into_bytes())
}

/// Hash bytes with SHA-256 and return lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Deterministic content identifier of a record.
pub fn content_id<T: Serialize>(record: &T) -> ServiceResult<String> {
    Ok(format!("cid_{}", sha256_hex(&canonical_bytes(record)?)))
}

fn write_canonical(value: &Value, out: &mut String) -> ServiceResult<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        // serde_json renders integers exactly and floats in shortest
        // round-trippable decimal form; NaN/Infinity are unrepresentable.
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            let escaped = serde_json::to_string(s)
                .map_err(|e| ServiceError::Internal(format!("string encoding failed: {}", e)))?;
            out.push_str(&escaped);
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, item)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let escaped = serde_json::to_string(key)
                    .map_err(|e| ServiceError::Internal(format!("key encoding failed: {}", e)))?;
                out.push_str(&escaped);
                out.push(':');
                write_canonical(item, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_is_irrelevant() {
        let a = json!({"b": 1, "a": {"y": 2, "x": [3, 4]}});
        let b = json!({"a": {"x": [3, 4], "y": 2}, "b": 1});
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
        assert_eq!(content_id(&a).unwrap(), content_id(&b).unwrap());
    }

    #[test]
    fn test_array_order_is_preserved() {
        let a = json!({"list": [1, 2]});
        let b = json!({"list": [2, 1]});
        assert_ne!(content_id(&a).unwrap(), content_id(&b).unwrap());
    }

    #[test]
    fn test_canonical_form_is_compact_and_sorted() {
        let value = json!({"z": "s", "a": 1.5, "m": null});
        let bytes = canonical_bytes(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":1.5,"m":null,"z":"s"}"#
        );
    }

    #[test]
    fn test_numbers_keep_shortest_exact_form() {
        let value = json!({"int": 42, "frac": 0.25, "neg": -7});
        let text = String::from_utf8(canonical_bytes(&value).unwrap()).unwrap();
        assert_eq!(text, r#"{"frac":0.25,"int":42,"neg":-7}"#);
    }

    #[test]
    fn test_content_id_shape() {
        let id = content_id(&json!({"k": "v"})).unwrap();
        assert!(id.starts_with("cid_"));
        assert_eq!(id.len(), 4 + 64);
    }

    #[test]
    fn test_string_escaping_is_stable() {
        let value = json!({"s": "line\nbreak \"quoted\""});
        let text = String::from_utf8(canonical_bytes(&value).unwrap()).unwrap();
        assert_eq!(text, r#"{"s":"line\nbreak \"quoted\""}"#);
    }
}
