use crate::error::{NormalizeError, RowIntegrityError};
use crate::normalize::ids::{child_row_id, IdGenerator};
use crate::normalize::propagation::{Propagated, PropagationPlan};
use crate::normalize::types::{
    Anomaly, FieldAnomaly, Row, RowId, TableBatch, DLT_ID, DLT_LIST_IDX, DLT_LOAD_ID,
    DLT_PARENT_ID, VALUE_COLUMN,
};
use crate::schema::data_type::value_kind;
use crate::schema::{DataType, OrderedMap, Schema, Table, WriteDisposition};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Turns nested records into rows of parent and child tables.
///
/// Nested objects flatten into columns of the row they appear in
/// (`tx.meta.fee` becomes `meta__fee`); nested lists become rows of a child
/// table named by the path (`blocks__transactions`). A normalizer only reads
/// the schema, so one instance can serve many threads.
#[derive(Debug, Clone)]
pub struct Normalizer {
    schema: Arc<Schema>,
    plan: Arc<PropagationPlan>,
    ids: Arc<IdGenerator>,
    load_id: Option<String>,
    max_nesting: Option<usize>,
}

/// What a row hands to the rows nested below it. Never mutated once built.
#[derive(Debug, Clone)]
struct AncestorContext {
    parent_id: Option<RowId>,
    derive_ids: bool,
    propagated: Propagated,
}

struct PendingList {
    table: String,
    items: Vec<Value>,
    nesting: usize,
}

/// A row while its fields are being collected
struct RowBuilder<'a> {
    table: &'a str,
    declared: Option<&'a Table>,
    sealed: bool,
    data: Map<String, Value>,
    lists: Vec<PendingList>,
}

impl RowBuilder<'_> {
    fn declares(&self, column: &str) -> bool {
        self.declared.is_some_and(|t| t.column(column).is_some())
    }
}

impl Normalizer {
    pub fn new(schema: Arc<Schema>) -> Self {
        let plan = Arc::new(PropagationPlan::build(&schema));
        let max_nesting = schema.max_nesting();
        Normalizer {
            schema,
            plan,
            ids: Arc::new(IdGenerator::new()),
            load_id: None,
            max_nesting,
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Reproducible ids, for tests and replays
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_id_generator(Arc::new(IdGenerator::seeded(seed)))
    }

    /// Stamp every root row with `_dlt_load_id`
    pub fn with_load_id(mut self, load_id: impl Into<String>) -> Self {
        self.load_id = Some(load_id.into());
        self
    }

    /// Override the schema's `max_nesting`; `None` explodes at any depth
    pub fn with_max_nesting(mut self, max_nesting: Option<usize>) -> Self {
        self.max_nesting = max_nesting;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn plan(&self) -> &PropagationPlan {
        &self.plan
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// Normalize a record into the schema's default root table
    pub fn normalize(&self, record: Value) -> Result<TableBatch, NormalizeError> {
        self.normalize_record(record, None)
    }

    pub fn normalize_into(&self, record: Value, table: &str) -> Result<TableBatch, NormalizeError> {
        self.normalize_record(record, Some(table))
    }

    pub fn normalize_record(
        &self,
        record: Value,
        table: Option<&str>,
    ) -> Result<TableBatch, NormalizeError> {
        let table = table
            .or_else(|| self.schema.default_root_table())
            .ok_or(NormalizeError::NoRootTable)?;

        let declared = self.schema.table(table);
        if declared.is_none() && self.schema.is_sealed() {
            return Err(NormalizeError::UnknownTable {
                table: table.to_string(),
            });
        }

        let ctx = AncestorContext {
            parent_id: None,
            derive_ids: declared.is_some_and(|t| t.write_disposition == WriteDisposition::Merge),
            propagated: Arc::new(OrderedMap::new()),
        };

        let mut batch = TableBatch::new();
        self.emit_row(wrap(record), table, None, None, &ctx, 0, &mut batch);
        Ok(batch)
    }

    /// Normalize independent records on `workers` threads. Results are in input order.
    pub fn normalize_parallel(
        &self,
        records: Vec<Value>,
        table: Option<&str>,
        workers: usize,
    ) -> Vec<Result<TableBatch, NormalizeError>> {
        let workers = workers.max(1);
        if workers == 1 || records.len() < 2 {
            return records
                .into_iter()
                .map(|r| self.normalize_record(r, table))
                .collect();
        }

        let chunk_size = records.len().div_ceil(workers);
        let mut chunks: Vec<Vec<Value>> = Vec::with_capacity(workers);
        let mut remaining = records.into_iter();
        loop {
            let chunk: Vec<Value> = remaining.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            chunks.push(chunk);
        }

        std::thread::scope(|s| {
            let handles: Vec<_> = chunks
                .into_iter()
                .map(|chunk| {
                    s.spawn(move || {
                        chunk
                            .into_iter()
                            .map(|r| self.normalize_record(r, table))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut results = Vec::new();
            for handle in handles {
                match handle.join() {
                    Ok(batches) => results.extend(batches),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            results
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_row(
        &self,
        record: Map<String, Value>,
        table: &str,
        parent_table: Option<&str>,
        list_idx: Option<usize>,
        ctx: &AncestorContext,
        nesting: usize,
        batch: &mut TableBatch,
    ) {
        let declared = self.schema.table(table);
        let sealed = self.schema.is_table_sealed(table);
        let mut row = RowBuilder {
            table,
            declared,
            sealed,
            data: Map::new(),
            lists: Vec::new(),
        };
        self.flatten_fields(&mut row, None, record, nesting, batch);
        let RowBuilder {
            mut data, lists, ..
        } = row;

        let id = match (data.get(DLT_ID).and_then(Value::as_str), &ctx.parent_id, list_idx) {
            (Some(given), _, _) => RowId::new(given),
            (None, Some(parent), Some(idx)) if ctx.derive_ids => child_row_id(parent, table, idx),
            _ => self.ids.new_id(),
        };
        data.insert(DLT_ID.to_string(), Value::String(id.0.clone()));

        match (&ctx.parent_id, list_idx) {
            (Some(parent), Some(idx)) => {
                data.insert(DLT_PARENT_ID.to_string(), Value::String(parent.0.clone()));
                data.insert(DLT_LIST_IDX.to_string(), Value::from(idx));
            }
            _ => {
                if let Some(load_id) = &self.load_id {
                    data.insert(DLT_LOAD_ID.to_string(), Value::String(load_id.clone()));
                }
            }
        }

        // sources are read before inherited values land, so values travel exactly one hop
        let propagated = self
            .plan
            .descend(&ctx.propagated, table, ctx.parent_id.is_none(), &data);
        for (target, value) in ctx.propagated.iter() {
            data.insert(target.to_string(), value.clone());
        }

        if let Some(declared) = declared {
            let missing = declared
                .required_columns()
                .find(|(c, _)| data.get(&c.name).map_or(true, Value::is_null));
            if let Some((column, hint)) = missing {
                let error = RowIntegrityError::MissingKeyValue {
                    table: table.to_string(),
                    column: column.name.clone(),
                    hint,
                };
                log::debug!("{}", error);
                batch.record(Anomaly::RejectedRow(error));
                return;
            }
        }

        if !sealed {
            self.record_new_columns(table, parent_table, declared, &data, batch);
        }

        batch.push(Row::new(table, data));

        if lists.is_empty() {
            return;
        }
        let child_ctx = AncestorContext {
            parent_id: Some(id),
            derive_ids: ctx.derive_ids,
            propagated,
        };
        for list in lists {
            for (idx, item) in list.items.into_iter().enumerate() {
                self.emit_row(
                    wrap(item),
                    &list.table,
                    Some(table),
                    Some(idx),
                    &child_ctx,
                    list.nesting,
                    batch,
                );
            }
        }
    }

    /// Collect the fields of `object` into the row, descending into nested objects
    /// and setting aside nested lists for child tables.
    fn flatten_fields(
        &self,
        row: &mut RowBuilder<'_>,
        prefix: Option<&str>,
        object: Map<String, Value>,
        nesting: usize,
        batch: &mut TableBatch,
    ) {
        let naming = self.schema.naming();
        for (key, value) in object {
            let name = naming.normalize_identifier(&key);
            let column = match prefix {
                Some(prefix) => naming.make_path(&[prefix, &name]),
                None => name,
            };

            match value {
                Value::Null => {
                    if row.declares(&column) {
                        row.data.insert(column, Value::Null);
                    }
                }
                Value::Object(inner) if self.explodes(row, &column, nesting) => {
                    self.flatten_fields(row, Some(&column), inner, nesting + 1, batch);
                }
                Value::Array(items) if self.explodes(row, &column, nesting) => {
                    if items.is_empty() {
                        continue;
                    }
                    let child = naming.make_path(&[row.table, &column]);
                    if self.child_table_allowed(row, &child) {
                        row.lists.push(PendingList {
                            table: child,
                            items,
                            nesting: nesting + 1,
                        });
                    } else {
                        log::debug!("table `{}` may not be created, dropping `{}`", child, column);
                        batch.record(Anomaly::Field(FieldAnomaly::DroppedField {
                            table: row.table.to_string(),
                            column,
                        }));
                    }
                }
                value => self.add_field(row, column, value, batch),
            }
        }
    }

    fn add_field(
        &self,
        row: &mut RowBuilder<'_>,
        column: String,
        value: Value,
        batch: &mut TableBatch,
    ) {
        match row.declared.and_then(|t| t.column(&column)) {
            Some(declared) => {
                if let Some(expected) = declared.data_type {
                    if !expected.accepts(&value) {
                        batch.record(Anomaly::Field(FieldAnomaly::TypeMismatch {
                            table: row.table.to_string(),
                            column: column.clone(),
                            expected,
                            found: value_kind(&value),
                        }));
                    }
                }
                row.data.insert(column, value);
            }
            None if row.sealed => {
                log::debug!("dropping `{}` on sealed table `{}`", column, row.table);
                batch.record(Anomaly::Field(FieldAnomaly::DroppedField {
                    table: row.table.to_string(),
                    column,
                }));
            }
            None => {
                row.data.insert(column, value);
            }
        }
    }

    /// Whether a nested object or list at `nesting` is exploded rather than stored whole
    fn explodes(&self, row: &RowBuilder<'_>, column: &str, nesting: usize) -> bool {
        let declared_json = row
            .declared
            .and_then(|t| t.column(column))
            .is_some_and(|c| c.data_type == Some(DataType::Json));
        !declared_json && self.max_nesting.map_or(true, |max| nesting < max)
    }

    fn child_table_allowed(&self, row: &RowBuilder<'_>, child: &str) -> bool {
        self.schema.table(child).is_some() || (!self.schema.is_sealed() && !row.sealed)
    }

    fn record_new_columns(
        &self,
        table: &str,
        parent_table: Option<&str>,
        declared: Option<&Table>,
        data: &Map<String, Value>,
        batch: &mut TableBatch,
    ) {
        if declared.is_none() {
            batch.update_mut().add_table(table, parent_table);
        }
        for (column, value) in data {
            if value.is_null() || declared.is_some_and(|t| t.column(column).is_some()) {
                continue;
            }
            let data_type = self
                .schema
                .preferred_type(column)
                .or_else(|| DataType::infer(value));
            batch.update_mut().add_column(table, column, data_type);
        }
    }
}

/// List items and root records that are not objects become `{"value": item}`
fn wrap(item: Value) -> Map<String, Value> {
    match item {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert(VALUE_COLUMN.to_string(), other);
            map
        }
    }
}
