//! Relational normalization of nested records
//!
//! A [`Normalizer`] walks one record and produces a [`TableBatch`]: rows for the
//! root table and for every child table the record's lists explode into, linked
//! by `_dlt_id` / `_dlt_parent_id` / `_dlt_list_idx` and carrying propagated
//! ancestor columns. Non-fatal problems travel with the batch as [`Anomaly`]
//! values; tables and columns the schema does not know yet travel as a
//! [`crate::schema::SchemaUpdate`].

pub mod flattener;
pub mod ids;
pub mod propagation;
pub mod types;
pub mod writer;

pub use flattener::Normalizer;
pub use ids::{child_row_id, IdGenerator};
pub use propagation::{PropagationPlan, PropagationRule, PropagationScope, PropagationStep};
pub use types::{
    Anomaly, FieldAnomaly, NormalizeStats, Row, RowId, TableBatch, TableRows, DLT_ID,
    DLT_LIST_IDX, DLT_LOAD_ID, DLT_PARENT_ID, DLT_ROOT_ID, VALUE_COLUMN,
};
pub use writer::{RowSink, SingleWriter, TableWriter, TABLE_TAG};
