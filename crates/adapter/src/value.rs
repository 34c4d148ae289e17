use serde_json::Value;
use std::collections::BTreeMap;

/// A row crossing the core: column name to JSON value. Driver-specific
/// types are narrowed to this set by `sanitize` before they escape the
/// driver boundary.
pub type Row = BTreeMap<String, Value>;

/// Render 16 raw bytes as the canonical hyphenated lowercase UUID form,
/// taking the bytes in presented order with no byte-order rewriting.
pub fn normalize_uuid_bytes(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 16 {
        return None;
    }
    let hex = hex::encode(bytes);
    Some(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

/// Narrow a binary driver value: UUID-shaped byte strings become the
/// canonical text form, everything else is base64.
pub fn sanitize_binary(bytes: &[u8]) -> Value {
    match normalize_uuid_bytes(bytes) {
        Some(uuid) => Value::String(uuid),
        None => Value::String(base64::encode(bytes)),
    }
}

/// Prepare a value for binding into a column. Nested arrays and maps are
/// JSON-encoded to text unless the target column is structurally an array
/// or object type.
pub fn sanitize_for_bind(value: Value, column_is_structural: bool) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) if !column_is_structural => {
            Value::String(value.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn uuid_bytes_normalize_to_hyphenated_lowercase() {
        let bytes: Vec<u8> = (0u8..16).collect();
        let uuid = normalize_uuid_bytes(&bytes).unwrap();
        assert_eq!(uuid, "00010203-0405-0607-0809-0a0b0c0d0e0f");
        assert_eq!(uuid.len(), 36);
        assert_eq!(uuid, uuid.to_lowercase());

        assert_eq!(normalize_uuid_bytes(&bytes[..15]), None);
    }

    #[test]
    fn non_uuid_binary_is_base64() {
        assert_eq!(sanitize_binary(b"abc"), json!("YWJj"));
        let sixteen: Vec<u8> = vec![0xab; 16];
        assert_eq!(
            sanitize_binary(&sixteen),
            json!("abababab-abab-abab-abab-abababababab")
        );
    }

    #[test]
    fn structured_values_flatten_for_scalar_columns() {
        let nested = json!({"a": [1, 2, {"b": null}]});
        let flattened = sanitize_for_bind(nested.clone(), false);
        assert_eq!(flattened, json!(r#"{"a":[1,2,{"b":null}]}"#));
        assert_eq!(sanitize_for_bind(nested.clone(), true), nested);
        assert_eq!(sanitize_for_bind(json!(42), false), json!(42));
    }
}
