//! Content fingerprints over the comparable fields of a record.

use serde_json::Value;
use sha2::{Digest, Sha256};
use syncline_types::EntityRecord;

/// Hex SHA-256 of the canonical JSON of the record's comparable fields.
pub fn content_hash(record: &EntityRecord) -> String {
    hash_value(&record.comparable_fields())
}

/// Hex SHA-256 of the canonical form of an arbitrary JSON value.
pub fn hash_value(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

pub fn has_changed(a: &EntityRecord, b: &EntityRecord) -> bool {
    content_hash(a) != content_hash(b)
}

/// Serializes `value` with object keys sorted at every level, independent
/// of the map ordering serde_json was built with.
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
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
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
        scalar => out.push_str(&scalar.to_string()),
    }
}
