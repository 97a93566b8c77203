use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of the payload's canonical JSON form.
///
/// Object keys are emitted in sorted order, so two payloads that differ only
/// in key order hash identically.
pub fn payload_checksum(payload: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(payload, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, output: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            output.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    output.push(',');
                }
                output.push_str(&Value::String(key.clone()).to_string());
                output.push(':');
                write_canonical(&map[key], output);
            }
            output.push('}');
        }
        Value::Array(items) => {
            output.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    output.push(',');
                }
                write_canonical(item, output);
            }
            output.push(']');
        }
        scalar => output.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::payload_checksum;

    #[test]
    fn key_order_does_not_change_checksum() {
        let left = json!({"name": "Ada", "phone": {"mobile": "0912", "home": null}});
        let right = json!({"phone": {"home": null, "mobile": "0912"}, "name": "Ada"});

        assert_eq!(payload_checksum(&left), payload_checksum(&right));
    }

    #[test]
    fn value_changes_change_checksum() {
        let before = json!({"name": "Ada", "tags": ["a", "b"]});
        let after = json!({"name": "Ada", "tags": ["b", "a"]});

        assert_ne!(payload_checksum(&before), payload_checksum(&after));
    }

    #[test]
    fn checksum_is_lowercase_sha256_hex() {
        let checksum = payload_checksum(&json!({}));

        assert_eq!(checksum, "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a");
    }
}
