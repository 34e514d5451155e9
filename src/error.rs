//! Error types
//!
//! - [`SchemaIntegrityError`] is fatal: the schema cannot be used at all.
//! - [`RowIntegrityError`] rejects a single row; the rest of the record still
//!   normalizes and the error is reported as an anomaly.
//! - [`NormalizeError`] fails one record without affecting the session.

use crate::schema::hints::ColumnHint;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaIntegrityError {
    #[error("table `{table}` references parent `{parent}` which is not declared")]
    DanglingParent { table: String, parent: String },
    #[error("parent chain of table `{table}` is cyclic")]
    CyclicParent { table: String },
    #[error("table `{table}` is sealed, column `{column}` cannot be added")]
    SealedTable { table: String, column: String },
    #[error("schema is sealed, table `{table}` cannot be added")]
    SealedSchema { table: String },
    #[error("unknown column hint `{hint}` in default hints")]
    UnknownHint { hint: String },
    #[error("invalid name pattern `{pattern}`: {error}")]
    InvalidPattern { pattern: String, error: String },
    #[error("propagation rules reference table `{table}` which is not declared")]
    UnknownPropagationTable { table: String },
    #[error("table `{table}` is not declared")]
    UnknownTable { table: String },
    #[error("unsupported naming convention `{names}`")]
    UnknownNamingConvention { names: String },
    #[error("failed to parse schema: {error}")]
    Parse { error: String },
    #[error("failed to read schema file {path}: {error}")]
    Io { path: String, error: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RowIntegrityError {
    #[error("row of table `{table}` has no value for {hint} column `{column}`")]
    MissingKeyValue {
        table: String,
        column: String,
        hint: ColumnHint,
    },
}

impl RowIntegrityError {
    pub fn table(&self) -> &str {
        match self {
            RowIntegrityError::MissingKeyValue { table, .. } => table,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NormalizeError {
    #[error("table `{table}` is not declared and the schema is sealed")]
    UnknownTable { table: String },
    #[error("schema declares no root table and none was given")]
    NoRootTable,
}
