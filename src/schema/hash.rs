//! Content fingerprint of a schema
//!
//! The hash covers table and column definitions only. Descriptions and `x-`
//! annotations are cosmetic and excluded, so editing them never looks like drift.

use crate::schema::stored::StoredSchema;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

fn is_cosmetic(key: &str) -> bool {
    key == "description" || key.starts_with("x-")
}

fn strip_cosmetic(obj: &mut Map<String, Value>) {
    obj.retain(|k, _| !is_cosmetic(k));
}

/// Recursively sort object keys so serialization is independent of declaration order
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut entries: Vec<(String, Value)> = obj.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// The semantic content the hash is computed over
pub fn semantic_content(schema: &StoredSchema) -> Value {
    let mut tables = Map::new();

    for (name, table) in schema.tables.iter() {
        let Ok(Value::Object(mut table_obj)) = serde_json::to_value(table) else {
            continue;
        };
        strip_cosmetic(&mut table_obj);

        if let Some(Value::Object(columns)) = table_obj.get_mut("columns") {
            for column in columns.values_mut() {
                if let Value::Object(column_obj) = column {
                    strip_cosmetic(column_obj);
                }
            }
        }

        tables.insert(name.to_string(), Value::Object(table_obj));
    }

    canonicalize(Value::Object(tables))
}

/// Compute the version hash of a schema document
pub fn version_hash(schema: &StoredSchema) -> String {
    let content = semantic_content(schema);
    // serializing a Value cannot fail
    let bytes = serde_json::to_vec(&content).unwrap_or_default();
    STANDARD.encode(Sha256::digest(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
name: shop
tables:
  orders:
    description: All orders
    columns:
      id:
        data_type: bigint
        primary_key: true
      status:
        data_type: text
"#;

    #[test]
    fn test_hash_is_deterministic() {
        let a = StoredSchema::from_yaml_str(DOC).unwrap();
        let b = StoredSchema::from_yaml_str(DOC).unwrap();
        assert_eq!(version_hash(&a), version_hash(&b));
        assert_eq!(version_hash(&a).len(), 44);
    }

    #[test]
    fn test_cosmetic_changes_do_not_change_hash() {
        let a = StoredSchema::from_yaml_str(DOC).unwrap();
        let mut b = a.clone();
        let orders = b.tables.get_mut("orders").unwrap();
        orders.description = Some("Renamed".to_string());
        orders
            .annotations
            .insert("x-annotation".to_string(), Value::String("note".to_string()));
        orders.columns.get_mut("id").unwrap().description = Some("key".to_string());
        assert_eq!(version_hash(&a), version_hash(&b));
    }

    #[test]
    fn test_structural_changes_change_hash() {
        let a = StoredSchema::from_yaml_str(DOC).unwrap();
        let mut b = a.clone();
        let orders = b.tables.get_mut("orders").unwrap();
        orders.columns.get_mut("status").unwrap().nullable = Some(false);
        assert_ne!(version_hash(&a), version_hash(&b));
    }
}
