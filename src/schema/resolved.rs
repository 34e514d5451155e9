//! Resolved, query-efficient schema
//!
//! `Schema::resolve` validates a [`StoredSchema`] once and builds an arena of
//! tables with parent indexes and precomputed root-to-self ancestor chains, so the
//! normalizer never walks parent references at runtime.

use crate::error::SchemaIntegrityError;
use crate::schema::data_type::DataType;
use crate::schema::evolution::SchemaUpdate;
use crate::schema::hash::version_hash;
use crate::schema::hints::{ColumnHint, HintAggregator, HintSet, NameMatcher};
use crate::schema::naming::{naming_from_reference, NamingConvention};
use crate::schema::stored::{ColumnDef, RelationalConfig, StoredSchema, TableDef, WriteDisposition};
use std::collections::HashMap;
use std::sync::Arc;

/// Prefix of tables maintained by the loader rather than fed with records
pub const SYSTEM_TABLE_PREFIX: &str = "_dlt";

pub type TableIdx = usize;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: Option<DataType>,
    pub hints: HintSet,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub parent: Option<TableIdx>,
    /// Root first, this table last
    pub ancestors: Vec<TableIdx>,
    pub children: Vec<TableIdx>,
    pub write_disposition: WriteDisposition,
    pub sealed: bool,
    columns: Vec<Column>,
    column_index: HashMap<String, usize>,
    required: Vec<(usize, ColumnHint)>,
}

impl Table {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Number of ancestors above this table
    pub fn depth(&self) -> usize {
        self.ancestors.len() - 1
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_index.get(name).map(|&i| &self.columns[i])
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Columns that must hold a non-null value in every row, with the hint requiring it
    pub fn required_columns(&self) -> impl Iterator<Item = (&Column, ColumnHint)> {
        self.required.iter().map(|&(i, hint)| (&self.columns[i], hint))
    }
}

/// An immutable schema ready for normalization
#[derive(Debug)]
pub struct Schema {
    stored: StoredSchema,
    tables: Vec<Table>,
    by_name: HashMap<String, TableIdx>,
    naming: Arc<dyn NamingConvention>,
    hints: HintAggregator,
    preferred_types: Vec<(NameMatcher, DataType)>,
    config: RelationalConfig,
    hash_drift: bool,
}

impl Schema {
    /// Validate a schema document and build the resolved form
    pub fn resolve(mut stored: StoredSchema) -> Result<Self, SchemaIntegrityError> {
        let naming = naming_from_reference(
            &stored.normalizers.names,
            stored.normalizers.max_identifier_length,
        )?;
        let hints = HintAggregator::from_settings(&stored.settings)?;

        let mut preferred_types = Vec::with_capacity(stored.settings.preferred_types.len());
        for (name, data_type) in stored.settings.preferred_types.iter() {
            preferred_types.push((NameMatcher::parse(name)?, *data_type));
        }

        let by_name: HashMap<String, TableIdx> = stored
            .tables
            .keys()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();

        let mut parents = Vec::with_capacity(by_name.len());
        for (name, def) in stored.tables.iter() {
            let parent = match &def.parent {
                Some(parent) => Some(*by_name.get(parent).ok_or_else(|| {
                    SchemaIntegrityError::DanglingParent {
                        table: name.to_string(),
                        parent: parent.clone(),
                    }
                })?),
                None => None,
            };
            parents.push(parent);
        }

        let mut tables = Vec::with_capacity(parents.len());
        for (idx, (name, def)) in stored.tables.iter().enumerate() {
            let ancestors = Self::ancestor_chain(idx, name, &parents)?;
            tables.push(Self::resolve_table(
                name,
                def,
                parents[idx],
                ancestors,
                &stored,
                &hints,
            ));
        }

        for idx in 0..tables.len() {
            if let Some(parent) = tables[idx].parent {
                tables[parent].children.push(idx);
            }
        }

        // child tables write the way their root does
        let declared: Vec<_> = stored.tables.values().map(|d| d.write_disposition).collect();
        for idx in 0..tables.len() {
            if declared[idx].is_none() {
                let root = tables[idx].ancestors[0];
                tables[idx].write_disposition = tables[root].write_disposition;
            }
        }

        let config = stored.relational_config();
        for table in config.propagation.tables.keys() {
            if !by_name.contains_key(table) {
                return Err(SchemaIntegrityError::UnknownPropagationTable {
                    table: table.to_string(),
                });
            }
        }
        if let Some(root) = &config.root_table {
            if stored.settings.schema_sealed && !by_name.contains_key(root) {
                return Err(SchemaIntegrityError::SealedSchema { table: root.clone() });
            }
        }

        let computed = version_hash(&stored);
        let hash_drift = match &stored.version_hash {
            Some(declared) if *declared != computed => {
                log::warn!(
                    "schema `{}` v{} content does not match its version hash, treating as modified",
                    stored.name,
                    stored.version
                );
                stored.version += 1;
                true
            }
            _ => false,
        };
        stored.version_hash = Some(computed);

        log::debug!(
            "resolved schema `{}` v{} with {} tables",
            stored.name,
            stored.version,
            tables.len()
        );

        Ok(Schema {
            stored,
            tables,
            by_name,
            naming,
            hints,
            preferred_types,
            config,
            hash_drift,
        })
    }

    fn ancestor_chain(
        idx: TableIdx,
        name: &str,
        parents: &[Option<TableIdx>],
    ) -> Result<Vec<TableIdx>, SchemaIntegrityError> {
        let mut chain = vec![idx];
        let mut current = idx;
        while let Some(parent) = parents[current] {
            if chain.len() > parents.len() || chain.contains(&parent) {
                return Err(SchemaIntegrityError::CyclicParent {
                    table: name.to_string(),
                });
            }
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        Ok(chain)
    }

    fn resolve_table(
        name: &str,
        def: &TableDef,
        parent: Option<TableIdx>,
        ancestors: Vec<TableIdx>,
        stored: &StoredSchema,
        hints: &HintAggregator,
    ) -> Table {
        let mut columns = Vec::with_capacity(def.columns.len());
        let mut column_index = HashMap::with_capacity(def.columns.len());
        let mut required = Vec::new();

        for (column_name, column_def) in def.columns.iter() {
            let column_hints = hints.effective_hints(name, column_name, Some(column_def));
            if let Some(hint) = column_hints.required_by() {
                required.push((columns.len(), hint));
            }
            column_index.insert(column_name.to_string(), columns.len());
            columns.push(Column {
                name: column_name.to_string(),
                data_type: column_def.data_type,
                hints: column_hints,
            });
        }

        Table {
            name: name.to_string(),
            parent,
            ancestors,
            children: Vec::new(),
            write_disposition: def.write_disposition.unwrap_or(WriteDisposition::Append),
            sealed: def.table_sealed.unwrap_or(stored.settings.schema_sealed),
            columns,
            column_index,
            required,
        }
    }

    pub fn name(&self) -> &str {
        &self.stored.name
    }

    pub fn version(&self) -> u64 {
        self.stored.version
    }

    pub fn version_hash(&self) -> &str {
        self.stored.version_hash.as_deref().unwrap_or_default()
    }

    pub fn engine_version(&self) -> u32 {
        self.stored.engine_version
    }

    /// True when the declared version hash did not match the content
    pub fn hash_drift(&self) -> bool {
        self.hash_drift
    }

    /// The document this schema was resolved from, with version and hash updated
    pub fn stored(&self) -> &StoredSchema {
        &self.stored
    }

    pub fn naming(&self) -> &dyn NamingConvention {
        self.naming.as_ref()
    }

    pub fn config(&self) -> &RelationalConfig {
        &self.config
    }

    pub fn is_sealed(&self) -> bool {
        self.stored.settings.schema_sealed
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.by_name.get(name).map(|&i| &self.tables[i])
    }

    pub fn table_at(&self, idx: TableIdx) -> &Table {
        &self.tables[idx]
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&Column> {
        self.table(table).and_then(|t| t.column(column))
    }

    /// Ancestor tables of `name`, root first and the table itself last
    pub fn ancestors(&self, name: &str) -> Vec<&Table> {
        self.table(name)
            .map(|t| t.ancestors.iter().map(|&i| &self.tables[i]).collect())
            .unwrap_or_default()
    }

    pub fn root_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().filter(|t| t.is_root())
    }

    /// Table records go to when the caller does not name one
    pub fn default_root_table(&self) -> Option<&str> {
        if let Some(root) = &self.config.root_table {
            return Some(root.as_str());
        }
        self.root_tables()
            .find(|t| !t.name.starts_with(SYSTEM_TABLE_PREFIX))
            .map(|t| t.name.as_str())
    }

    /// Whether `table` rejects new columns; undeclared tables follow the schema setting
    pub fn is_table_sealed(&self, table: &str) -> bool {
        self.table(table)
            .map(|t| t.sealed)
            .unwrap_or_else(|| self.is_sealed())
    }

    pub fn max_nesting(&self) -> Option<usize> {
        self.config.max_nesting
    }

    /// Effective hints of any column, declared or not
    pub fn effective_hints(&self, table: &str, column: &str) -> HintSet {
        match self.column(table, column) {
            Some(c) => c.hints,
            None => self.hints.effective_hints(table, column, None),
        }
    }

    /// Type a newly discovered column should get, if a preferred type matches its name
    pub fn preferred_type(&self, column: &str) -> Option<DataType> {
        self.preferred_types
            .iter()
            .find(|(m, _)| m.is_exact() && m.matches(column))
            .or_else(|| self.preferred_types.iter().find(|(m, _)| m.matches(column)))
            .map(|(_, t)| *t)
    }

    /// Build the next schema version with the discovered tables and columns added
    pub fn apply_update(&self, update: &SchemaUpdate) -> Result<Schema, SchemaIntegrityError> {
        let mut stored = self.stored.clone();

        for table in update.tables() {
            if stored.tables.contains_key(&table.name) {
                continue;
            }
            if self.is_sealed() {
                return Err(SchemaIntegrityError::SealedSchema {
                    table: table.name.clone(),
                });
            }
            if let Some(parent) = &table.parent {
                if self.table(parent).is_some_and(|p| p.sealed) {
                    return Err(SchemaIntegrityError::SealedTable {
                        table: parent.clone(),
                        column: table.name.clone(),
                    });
                }
            }
            stored.tables.insert(
                table.name.clone(),
                TableDef {
                    parent: table.parent.clone(),
                    ..Default::default()
                },
            );
        }

        for column in update.columns() {
            if self.table(&column.table).is_some_and(|t| t.sealed) {
                return Err(SchemaIntegrityError::SealedTable {
                    table: column.table.clone(),
                    column: column.name.clone(),
                });
            }
            let Some(table) = stored.tables.get_mut(&column.table) else {
                return Err(SchemaIntegrityError::UnknownTable {
                    table: column.table.clone(),
                });
            };
            if !table.columns.contains_key(&column.name) {
                table
                    .columns
                    .insert(column.name.clone(), ColumnDef::with_type(column.data_type));
            }
        }

        if update.is_empty() {
            return Schema::resolve(stored);
        }

        stored.version += 1;
        stored.version_hash = Some(version_hash(&stored));
        log::info!(
            "schema `{}` evolved to v{}: {} new tables, {} new columns",
            stored.name,
            stored.version,
            update.tables().len(),
            update.columns().len()
        );
        Schema::resolve(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH_SCHEMA: &str = include_str!("../../schemas/ethereum.schema.yaml");

    fn eth() -> Schema {
        Schema::resolve(StoredSchema::from_yaml_str(ETH_SCHEMA).unwrap()).unwrap()
    }

    #[test]
    fn test_resolve_fixture() {
        let schema = eth();
        assert_eq!(schema.name(), "ethereum");
        assert_eq!(schema.default_root_table(), Some("blocks"));

        let topics = schema.table("blocks__transactions__logs__topics").unwrap();
        let chain: Vec<_> = schema
            .ancestors(&topics.name)
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(
            chain,
            vec![
                "blocks",
                "blocks__transactions",
                "blocks__transactions__logs",
                "blocks__transactions__logs__topics"
            ]
        );
        assert_eq!(topics.depth(), 3);

        let blocks = schema.table("blocks").unwrap();
        assert!(blocks.is_root());
        assert!(blocks.sealed);
        assert_eq!(blocks.children.len(), 2);

        // child tables inherit the root's disposition
        let txs = schema.table("blocks__transactions").unwrap();
        assert_eq!(txs.write_disposition, WriteDisposition::Append);
        assert!(!txs.sealed);
    }

    #[test]
    fn test_fixture_hash_matches() {
        let schema = eth();
        assert!(!schema.hash_drift());
        assert_eq!(schema.version(), 14);
    }

    #[test]
    fn test_effective_hints_from_fixture() {
        let schema = eth();
        let number = schema.column("blocks", "number").unwrap();
        assert!(number.hints.primary_key);
        assert!(!number.hints.nullable);

        let required: Vec<_> = schema
            .table("blocks")
            .unwrap()
            .required_columns()
            .map(|(c, h)| (c.name.as_str(), h))
            .collect();
        assert_eq!(
            required,
            vec![
                ("_dlt_id", ColumnHint::Unique),
                ("number", ColumnHint::PrimaryKey),
                ("hash", ColumnHint::Unique),
            ]
        );

        // undeclared column resolved from default hints
        let hints = schema.effective_hints("blocks__withdrawals", "block_timestamp");
        assert!(hints.partition);
        assert_eq!(schema.preferred_type("parent_hash"), Some(DataType::Text));
        assert_eq!(schema.preferred_type("timestamp"), Some(DataType::Timestamp));
        assert_eq!(schema.preferred_type("miner"), None);
    }

    #[test]
    fn test_dangling_parent() {
        let mut stored = StoredSchema::new("s");
        stored.tables.insert(
            "a__b",
            TableDef {
                parent: Some("a".to_string()),
                ..Default::default()
            },
        );
        let err = Schema::resolve(stored).unwrap_err();
        assert_eq!(
            err,
            SchemaIntegrityError::DanglingParent {
                table: "a__b".to_string(),
                parent: "a".to_string()
            }
        );
    }

    #[test]
    fn test_cyclic_parent() {
        let mut stored = StoredSchema::new("s");
        stored.tables.insert(
            "a",
            TableDef {
                parent: Some("b".to_string()),
                ..Default::default()
            },
        );
        stored.tables.insert(
            "b",
            TableDef {
                parent: Some("a".to_string()),
                ..Default::default()
            },
        );
        let err = Schema::resolve(stored).unwrap_err();
        assert!(matches!(err, SchemaIntegrityError::CyclicParent { .. }));
    }

    #[test]
    fn test_hash_drift_bumps_version() {
        let mut stored = StoredSchema::from_yaml_str(ETH_SCHEMA).unwrap();
        stored.tables.get_mut("blocks").unwrap().columns.insert(
            "extra",
            ColumnDef::with_type(Some(DataType::Text)),
        );
        let schema = Schema::resolve(stored).unwrap();
        assert!(schema.hash_drift());
        assert_eq!(schema.version(), 15);
    }

    #[test]
    fn test_apply_update() {
        let schema = eth();
        let mut update = SchemaUpdate::new();
        update.add_column("blocks__transactions", "y_parity", Some(DataType::Bigint));
        update.add_table("blocks__transactions__blobs", Some("blocks__transactions"));
        update.add_column("blocks__transactions__blobs", "value", Some(DataType::Text));

        let evolved = schema.apply_update(&update).unwrap();
        assert_eq!(evolved.version(), schema.version() + 1);
        assert_ne!(evolved.version_hash(), schema.version_hash());
        assert!(!evolved.hash_drift());
        assert_eq!(
            evolved.column("blocks__transactions", "y_parity").unwrap().data_type,
            Some(DataType::Bigint)
        );
        let blobs = evolved.table("blocks__transactions__blobs").unwrap();
        assert_eq!(blobs.depth(), 2);
    }

    #[test]
    fn test_apply_update_on_sealed_table_fails() {
        let schema = eth();
        let mut update = SchemaUpdate::new();
        update.add_column("blocks", "withdrawals_root", Some(DataType::Text));
        let err = schema.apply_update(&update).unwrap_err();
        assert_eq!(
            err,
            SchemaIntegrityError::SealedTable {
                table: "blocks".to_string(),
                column: "withdrawals_root".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_propagation_table() {
        let mut stored = StoredSchema::from_yaml_str(ETH_SCHEMA).unwrap();
        let mut json = stored.normalizers.json.take().unwrap();
        json.config
            .propagation
            .tables
            .insert("receipts", Default::default());
        stored.normalizers.json = Some(json);
        let err = Schema::resolve(stored).unwrap_err();
        assert!(matches!(err, SchemaIntegrityError::UnknownPropagationTable { .. }));
    }
}
