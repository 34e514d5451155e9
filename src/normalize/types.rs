use crate::error::RowIntegrityError;
use crate::schema::{DataType, SchemaUpdate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Unique id of the row
pub const DLT_ID: &str = "_dlt_id";
/// `_dlt_id` of the row this row was nested in
pub const DLT_PARENT_ID: &str = "_dlt_parent_id";
/// Position in the list the row came from
pub const DLT_LIST_IDX: &str = "_dlt_list_idx";
/// Conventional propagation target for the root row's `_dlt_id`
pub const DLT_ROOT_ID: &str = "_dlt_root_id";
/// Load the root row belongs to
pub const DLT_LOAD_ID: &str = "_dlt_load_id";
/// Column holding list items that are not objects
pub const VALUE_COLUMN: &str = "value";

/// Synthetic identifier of a row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowId(pub String);

impl RowId {
    pub fn new(id: impl Into<String>) -> Self {
        RowId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One flat row of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Owning table, e.g. "blocks__transactions"
    pub table: String,

    /// Column values in insertion order
    pub data: Map<String, Value>,
}

impl Row {
    pub fn new(table: impl Into<String>, data: Map<String, Value>) -> Self {
        Row {
            table: table.into(),
            data,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }

    pub fn id(&self) -> Option<&str> {
        self.data.get(DLT_ID).and_then(Value::as_str)
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.data.get(DLT_PARENT_ID).and_then(Value::as_str)
    }

    pub fn list_idx(&self) -> Option<u64> {
        self.data.get(DLT_LIST_IDX).and_then(Value::as_u64)
    }
}

/// A field that did not make it into a row as declared
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldAnomaly {
    /// Undeclared field on a sealed table (or a nested list whose table may not be created)
    DroppedField { table: String, column: String },
    /// Value does not look like the declared type; it was passed through unchanged
    TypeMismatch {
        table: String,
        column: String,
        expected: DataType,
        found: &'static str,
    },
}

impl fmt::Display for FieldAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldAnomaly::DroppedField { table, column } => {
                write!(f, "dropped field `{}` on sealed table `{}`", column, table)
            }
            FieldAnomaly::TypeMismatch {
                table,
                column,
                expected,
                found,
            } => write!(
                f,
                "column `{}.{}` declared {} but got {}",
                table, column, expected, found
            ),
        }
    }
}

/// Non-fatal problem reported alongside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum Anomaly {
    Field(FieldAnomaly),
    /// The row and everything nested below it were not emitted
    RejectedRow(RowIntegrityError),
}

impl Anomaly {
    pub fn table(&self) -> &str {
        match self {
            Anomaly::Field(FieldAnomaly::DroppedField { table, .. }) => table,
            Anomaly::Field(FieldAnomaly::TypeMismatch { table, .. }) => table,
            Anomaly::RejectedRow(e) => e.table(),
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::Field(a) => a.fmt(f),
            Anomaly::RejectedRow(e) => write!(f, "rejected row: {}", e),
        }
    }
}

/// Rows of one table in emission order
#[derive(Debug, Clone, PartialEq)]
pub struct TableRows {
    pub name: String,
    pub rows: Vec<Row>,
}

/// Everything one input record normalized into.
///
/// Tables appear in the order they first received a row.
#[derive(Debug, Clone, Default)]
pub struct TableBatch {
    tables: Vec<TableRows>,
    index: HashMap<String, usize>,
    anomalies: Vec<Anomaly>,
    update: SchemaUpdate,
}

impl TableBatch {
    pub fn new() -> Self {
        TableBatch::default()
    }

    pub(crate) fn push(&mut self, row: Row) {
        match self.index.get(&row.table) {
            Some(&i) => self.tables[i].rows.push(row),
            None => {
                self.index.insert(row.table.clone(), self.tables.len());
                self.tables.push(TableRows {
                    name: row.table.clone(),
                    rows: vec![row],
                });
            }
        }
    }

    pub(crate) fn record(&mut self, anomaly: Anomaly) {
        self.anomalies.push(anomaly);
    }

    pub(crate) fn update_mut(&mut self) -> &mut SchemaUpdate {
        &mut self.update
    }

    /// Rows of `table`, empty if the record produced none
    pub fn rows(&self, table: &str) -> &[Row] {
        self.index
            .get(table)
            .map(|&i| self.tables[i].rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn tables(&self) -> &[TableRows] {
        &self.tables
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn rejected_rows(&self) -> usize {
        self.anomalies
            .iter()
            .filter(|a| matches!(a, Anomaly::RejectedRow(_)))
            .count()
    }

    /// Tables and columns this record would add to the schema
    pub fn schema_update(&self) -> &SchemaUpdate {
        &self.update
    }
}

/// Running totals of a normalization session
#[derive(Debug, Clone, Default)]
pub struct NormalizeStats {
    pub records: usize,
    pub failed_records: usize,
    pub rows: usize,
    pub anomalies: usize,
    pub rejected_rows: usize,
    pub schema_update: SchemaUpdate,
}

impl NormalizeStats {
    pub fn absorb(&mut self, batch: &TableBatch) {
        self.records += 1;
        self.rows += batch.row_count();
        self.anomalies += batch.anomalies().len();
        self.rejected_rows += batch.rejected_rows();
        self.schema_update.merge(batch.schema_update());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(table: &str, data: Value) -> Row {
        Row::new(table, serde_json::from_value(data).unwrap())
    }

    #[test]
    fn test_batch_keeps_first_seen_table_order() {
        let mut batch = TableBatch::new();
        batch.push(row("a", json!({"x": 1})));
        batch.push(row("a__b", json!({"x": 2})));
        batch.push(row("a", json!({"x": 3})));

        let names: Vec<_> = batch.table_names().collect();
        assert_eq!(names, vec!["a", "a__b"]);
        assert_eq!(batch.rows("a").len(), 2);
        assert_eq!(batch.rows("a")[1].get("x").unwrap(), 3);
        assert!(batch.rows("missing").is_empty());
        assert_eq!(batch.row_count(), 3);
    }

    #[test]
    fn test_row_accessors() {
        let r = row(
            "t",
            json!({"_dlt_id": "abc", "_dlt_parent_id": "p", "_dlt_list_idx": 2}),
        );
        assert_eq!(r.id(), Some("abc"));
        assert_eq!(r.parent_id(), Some("p"));
        assert_eq!(r.list_idx(), Some(2));
    }

    #[test]
    fn test_stats_absorb() {
        let mut batch = TableBatch::new();
        batch.push(row("a", json!({"x": 1})));
        batch.record(Anomaly::Field(FieldAnomaly::DroppedField {
            table: "a".to_string(),
            column: "y".to_string(),
        }));
        batch.update_mut().add_column("a", "x", Some(DataType::Bigint));

        let mut stats = NormalizeStats::default();
        stats.absorb(&batch);
        stats.absorb(&batch);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.anomalies, 2);
        assert_eq!(stats.schema_update.columns().len(), 1);
        assert_eq!(batch.anomalies()[0].to_string(), "dropped field `y` on sealed table `a`");
    }
}
