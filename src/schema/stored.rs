//! Schema document model
//!
//! This is the on-disk shape of a schema (YAML or JSON). It is deliberately loose:
//! anything the normalizer does not interpret (descriptions, `x-` annotations,
//! filters, unknown top-level keys) is kept verbatim so a load/save cycle does not
//! lose it. Structural validation happens in [`crate::schema::Schema::resolve`].

use crate::error::SchemaIntegrityError;
use crate::schema::data_type::DataType;
use crate::schema::ordered::OrderedMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

pub const ENGINE_VERSION: u32 = 9;

fn default_engine_version() -> u32 {
    ENGINE_VERSION
}

/// A complete schema document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSchema {
    pub name: String,

    #[serde(default)]
    pub version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_hash: Option<String>,

    #[serde(default = "default_engine_version")]
    pub engine_version: u32,

    #[serde(default)]
    pub tables: OrderedMap<TableDef>,

    #[serde(default)]
    pub settings: SchemaSettings,

    #[serde(default)]
    pub normalizers: NormalizersConfig,

    /// Top-level keys the normalizer does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How rows of a table are written by the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteDisposition {
    Append,
    Replace,
    Merge,
    Skip,
}

/// A table declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_disposition: Option<WriteDisposition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_sealed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Include/exclude row predicates, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,

    #[serde(default)]
    pub columns: OrderedMap<ColumnDef>,

    /// `x-` annotations and any other keys, preserved verbatim
    #[serde(flatten)]
    pub annotations: Map<String, Value>,
}

/// A column declaration. Hints are optional so an explicit `false` can be told
/// apart from "not declared" when merging with default hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_key: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(flatten)]
    pub annotations: Map<String, Value>,
}

impl ColumnDef {
    pub fn with_type(data_type: Option<DataType>) -> Self {
        ColumnDef {
            data_type,
            nullable: Some(true),
            ..Default::default()
        }
    }
}

/// Schema-wide settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSettings {
    /// hint name -> column names; entries prefixed with `re:` are regexes
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub default_hints: OrderedMap<Vec<String>>,

    /// column name or `re:` pattern -> type used for newly discovered columns
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub preferred_types: OrderedMap<DataType>,

    #[serde(default)]
    pub schema_sealed: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Normalizer configuration block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizersConfig {
    /// Naming convention reference
    #[serde(default = "default_names")]
    pub names: String,

    /// Identifiers longer than this are shortened with a hash tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_identifier_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<JsonNormalizer>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_names() -> String {
    "snake_case".to_string()
}

impl Default for NormalizersConfig {
    fn default() -> Self {
        NormalizersConfig {
            names: default_names(),
            max_identifier_length: None,
            json: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonNormalizer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    #[serde(default)]
    pub config: RelationalConfig,
}

/// Settings of the relational normalizer itself
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_nesting: Option<usize>,

    /// Table records are normalized into when the caller does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_table: Option<String>,

    #[serde(default)]
    pub propagation: PropagationConfig,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Column propagation rules: `source column -> target column`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Applied from every root row to all of its descendants
    #[serde(default)]
    pub root: OrderedMap<String>,

    /// Applied from rows of the named table to all of its descendants
    #[serde(default)]
    pub tables: OrderedMap<OrderedMap<String>>,
}

impl StoredSchema {
    /// Create an empty schema document
    pub fn new(name: impl Into<String>) -> Self {
        StoredSchema {
            name: name.into(),
            version: 1,
            version_hash: None,
            engine_version: ENGINE_VERSION,
            tables: OrderedMap::new(),
            settings: SchemaSettings::default(),
            normalizers: NormalizersConfig::default(),
            extra: Map::new(),
        }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, SchemaIntegrityError> {
        serde_yaml::from_str(s).map_err(|e| SchemaIntegrityError::Parse {
            error: e.to_string(),
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self, SchemaIntegrityError> {
        serde_json::from_str(s).map_err(|e| SchemaIntegrityError::Parse {
            error: e.to_string(),
        })
    }

    /// Load a schema file; `.json` files are read as JSON, anything else as YAML
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SchemaIntegrityError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SchemaIntegrityError::Io {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    pub fn to_yaml(&self) -> Result<String, SchemaIntegrityError> {
        serde_yaml::to_string(self).map_err(|e| SchemaIntegrityError::Parse {
            error: e.to_string(),
        })
    }

    pub fn relational_config(&self) -> RelationalConfig {
        self.normalizers
            .json
            .as_ref()
            .map(|j| j.config.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
name: shop
version: 3
engine_version: 9
x-owner: data-team
tables:
  orders:
    description: All orders
    x-annotation: kept as is
    write_disposition: append
    columns:
      id:
        data_type: bigint
        primary_key: true
        x-source: api
      status:
        data_type: text
  orders__items:
    parent: orders
    columns:
settings:
  default_hints:
    unique: [_dlt_id]
    not_null: ["re:^_dlt_"]
normalizers:
  names: snake_case
  json:
    module: relational
    config:
      propagation:
        root:
          _dlt_id: _dlt_root_id
"#;

    #[test]
    fn test_parse_document() {
        let schema = StoredSchema::from_yaml_str(DOC).unwrap();
        assert_eq!(schema.name, "shop");
        assert_eq!(schema.version, 3);
        assert_eq!(schema.tables.len(), 2);

        let orders = schema.tables.get("orders").unwrap();
        assert_eq!(orders.write_disposition, Some(WriteDisposition::Append));
        assert_eq!(orders.annotations.get("x-annotation").unwrap(), "kept as is");

        let id = orders.columns.get("id").unwrap();
        assert_eq!(id.data_type, Some(DataType::Bigint));
        assert_eq!(id.primary_key, Some(true));
        assert_eq!(id.unique, None);

        let items = schema.tables.get("orders__items").unwrap();
        assert_eq!(items.parent.as_deref(), Some("orders"));
        assert!(items.columns.is_empty());

        let config = schema.relational_config();
        assert_eq!(config.propagation.root.get("_dlt_id").unwrap(), "_dlt_root_id");
    }

    #[test]
    fn test_annotations_round_trip() {
        let schema = StoredSchema::from_yaml_str(DOC).unwrap();
        let yaml = schema.to_yaml().unwrap();
        let again = StoredSchema::from_yaml_str(&yaml).unwrap();

        assert_eq!(again.extra.get("x-owner").unwrap(), "data-team");
        let orders = again.tables.get("orders").unwrap();
        assert_eq!(orders.description.as_deref(), Some("All orders"));
        assert_eq!(
            orders.columns.get("id").unwrap().annotations.get("x-source").unwrap(),
            "api"
        );
        let names: Vec<_> = again.tables.keys().collect();
        assert_eq!(names, vec!["orders", "orders__items"]);
    }

    #[test]
    fn test_parse_error() {
        let err = StoredSchema::from_yaml_str("tables: [1, 2").unwrap_err();
        assert!(matches!(err, SchemaIntegrityError::Parse { .. }));
    }
}
