//! Tables and columns discovered while normalizing
//!
//! The schema is read-only during a session, so the normalizer only records what
//! it would add. [`crate::schema::Schema::apply_update`] turns an update into a new
//! schema version.

use crate::schema::data_type::DataType;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTable {
    pub name: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewColumn {
    pub table: String,
    pub name: String,
    pub data_type: Option<DataType>,
}

/// New tables and columns, in discovery order and without duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaUpdate {
    tables: Vec<NewTable>,
    columns: Vec<NewColumn>,
}

impl SchemaUpdate {
    pub fn new() -> Self {
        SchemaUpdate::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }

    pub fn tables(&self) -> &[NewTable] {
        &self.tables
    }

    pub fn columns(&self) -> &[NewColumn] {
        &self.columns
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.name == name)
    }

    pub fn add_table(&mut self, name: &str, parent: Option<&str>) {
        if !self.has_table(name) {
            self.tables.push(NewTable {
                name: name.to_string(),
                parent: parent.map(str::to_string),
            });
        }
    }

    /// Record a column; a later sighting can fill in a type the first one lacked
    pub fn add_column(&mut self, table: &str, name: &str, data_type: Option<DataType>) {
        match self
            .columns
            .iter_mut()
            .find(|c| c.table == table && c.name == name)
        {
            Some(existing) => {
                if existing.data_type.is_none() {
                    existing.data_type = data_type;
                }
            }
            None => self.columns.push(NewColumn {
                table: table.to_string(),
                name: name.to_string(),
                data_type,
            }),
        }
    }

    pub fn merge(&mut self, other: &SchemaUpdate) {
        for table in &other.tables {
            self.add_table(&table.name, table.parent.as_deref());
        }
        for column in &other.columns {
            self.add_column(&column.table, &column.name, column.data_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_and_type_fill() {
        let mut update = SchemaUpdate::new();
        update.add_table("a__b", Some("a"));
        update.add_table("a__b", Some("a"));
        update.add_column("a__b", "x", None);
        update.add_column("a__b", "x", Some(DataType::Text));
        update.add_column("a__b", "x", Some(DataType::Bigint));

        assert_eq!(update.tables().len(), 1);
        assert_eq!(update.columns().len(), 1);
        assert_eq!(update.columns()[0].data_type, Some(DataType::Text));
    }

    #[test]
    fn test_merge_keeps_order() {
        let mut a = SchemaUpdate::new();
        a.add_column("t", "first", Some(DataType::Bool));
        let mut b = SchemaUpdate::new();
        b.add_column("t", "second", Some(DataType::Text));
        b.add_column("t", "first", Some(DataType::Bool));
        a.merge(&b);

        let names: Vec<_> = a.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
