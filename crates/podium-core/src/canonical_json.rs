//! Canonical JSON encoding for deterministic fingerprinting.
//!
//! Two plans that are semantically equivalent must hash to the same
//! fingerprint, which requires byte-identical serialization. Canonical
//! JSON here means:
//!
//! - Object keys sorted lexicographically (UTF-8 byte order)
//! - No whitespace
//! - UTF-8 output
//! - Integers only: floats are rejected outright, because float
//!   stringification is not portable across serializers
//!
//! Fingerprint inputs are strings, booleans, and integers by
//! construction (scores never enter the canonical form), so the float
//! restriction costs nothing.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during canonical JSON encoding.
#[derive(Debug, Error)]
pub enum CanonicalJsonError {
    /// Serde JSON conversion failed.
    #[error("serde_json error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Float values are not allowed in canonical JSON.
    #[error("float values are not allowed in canonical JSON (use integers)")]
    FloatNotAllowed,
}

/// Serializes `value` into canonical JSON bytes.
///
/// # Errors
///
/// Returns `CanonicalJsonError::Serde` if serialization fails, or
/// `CanonicalJsonError::FloatNotAllowed` if the value contains a float.
#[must_use = "canonical bytes should be used for hashing"]
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalJsonError> {
    let v = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_value(&v, &mut out)?;
    Ok(out)
}

/// Same as [`to_canonical_bytes`], but returns a UTF-8 string.
///
/// # Errors
///
/// Returns the same errors as [`to_canonical_bytes`].
#[must_use = "canonical string should be used for hashing"]
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String, CanonicalJsonError> {
    let bytes = to_canonical_bytes(value)?;
    // write_value only emits valid UTF-8.
    String::from_utf8(bytes).map_err(|e| CanonicalJsonError::Serde(serde::ser::Error::custom(e)))
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CanonicalJsonError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if n.is_f64() {
                return Err(CanonicalJsonError::FloatNotAllowed);
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => {
            // serde_json's string escaping is deterministic.
            let escaped = serde_json::to_string(s)?;
            out.extend_from_slice(escaped.as_bytes());
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                let escaped = serde_json::to_string(key)?;
                out.extend_from_slice(escaped.as_bytes());
                out.push(b':');
                if let Some(v) = map.get(key) {
                    write_value(v, out)?;
                }
            }
            out.push(b'}');
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted() {
        let value = json!({"zebra": 1, "alpha": 2, "mid": {"b": 1, "a": 2}});
        let s = to_canonical_string(&value).unwrap();
        assert_eq!(s, r#"{"alpha":2,"mid":{"a":2,"b":1},"zebra":1}"#);
    }

    #[test]
    fn no_whitespace() {
        let value = json!({"a": [1, 2, 3], "b": "x y"});
        let s = to_canonical_string(&value).unwrap();
        assert!(!s.contains(' ') || s.contains("x y"));
        assert_eq!(s, r#"{"a":[1,2,3],"b":"x y"}"#);
    }

    #[test]
    fn floats_are_rejected() {
        let value = json!({"score": 0.8});
        let err = to_canonical_bytes(&value).unwrap_err();
        assert!(matches!(err, CanonicalJsonError::FloatNotAllowed));
    }

    #[test]
    fn integers_are_allowed() {
        let value = json!({"count": 100, "neg": -5});
        let s = to_canonical_string(&value).unwrap();
        assert_eq!(s, r#"{"count":100,"neg":-5}"#);
    }

    #[test]
    fn unicode_strings_roundtrip() {
        let value = json!({"language": "한국어"});
        let s = to_canonical_string(&value).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed["language"], "한국어");
    }

    #[test]
    fn identical_values_encode_identically() {
        let a = json!({"models": ["m1", "m2"], "size": 100});
        let b = json!({"size": 100, "models": ["m1", "m2"]});
        assert_eq!(
            to_canonical_bytes(&a).unwrap(),
            to_canonical_bytes(&b).unwrap()
        );
    }
}
