use crate::normalize::types::TableBatch;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Column naming the owning table in single-stream output
pub const TABLE_TAG: &str = "_table";

/// Destination for normalized rows
pub trait RowSink {
    fn write_batch(&mut self, batch: &TableBatch) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Writes rows to one JSON Lines file per table, `<dir>/<table>.jsonl`
pub struct TableWriter {
    dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl TableWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        let dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        Ok(TableWriter {
            dir,
            writers: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Tables written so far
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.writers.keys().map(String::as_str)
    }

    fn writer_for(&mut self, table: &str) -> Result<&mut BufWriter<File>> {
        if !self.writers.contains_key(table) {
            let path = self.dir.join(format!("{}.jsonl", table));
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open file: {}", path.display()))?;
            self.writers.insert(table.to_string(), BufWriter::new(file));
        }
        self.writers
            .get_mut(table)
            .context("table writer missing after insert")
    }
}

impl RowSink for TableWriter {
    fn write_batch(&mut self, batch: &TableBatch) -> Result<()> {
        for table in batch.tables() {
            let writer = self.writer_for(&table.name)?;
            for row in &table.rows {
                serde_json::to_writer(&mut *writer, &row.data).context("Failed to serialize row")?;
                writer.write_all(b"\n").context("Failed to write row")?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush().context("Failed to flush writer")?;
        }
        Ok(())
    }
}

/// Writes all rows to a single stream, each tagged with its table
pub struct SingleWriter<W: Write> {
    writer: W,
}

impl<W: Write> SingleWriter<W> {
    pub fn new(writer: W) -> Self {
        SingleWriter { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RowSink for SingleWriter<W> {
    fn write_batch(&mut self, batch: &TableBatch) -> Result<()> {
        for table in batch.tables() {
            for row in &table.rows {
                let mut data = row.data.clone();
                data.insert(TABLE_TAG.to_string(), Value::String(table.name.clone()));

                let json = serde_json::to_string(&data).context("Failed to serialize row")?;
                writeln!(self.writer, "{}", json).context("Failed to write row")?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::types::Row;
    use serde_json::json;

    fn batch() -> TableBatch {
        let mut batch = TableBatch::new();
        batch.push(Row::new(
            "blocks",
            serde_json::from_value(json!({"number": 1, "_dlt_id": "a"})).unwrap(),
        ));
        batch.push(Row::new(
            "blocks__uncles",
            serde_json::from_value(json!({"value": "u", "_dlt_parent_id": "a"})).unwrap(),
        ));
        batch.push(Row::new(
            "blocks__uncles",
            serde_json::from_value(json!({"value": "v", "_dlt_parent_id": "a"})).unwrap(),
        ));
        batch
    }

    #[test]
    fn test_single_writer() {
        let mut writer = SingleWriter::new(Vec::new());
        writer.write_batch(&batch()).unwrap();
        writer.flush().unwrap();

        let output = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["_table"], "blocks");
        assert_eq!(lines[2]["value"], "v");
    }

    #[test]
    fn test_table_writer() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TableWriter::new(dir.path().join("out")).unwrap();
        writer.write_batch(&batch()).unwrap();
        writer.write_batch(&batch()).unwrap();
        writer.flush().unwrap();

        let uncles = std::fs::read_to_string(dir.path().join("out/blocks__uncles.jsonl")).unwrap();
        assert_eq!(uncles.lines().count(), 4);
        let first: Value = serde_json::from_str(uncles.lines().next().unwrap()).unwrap();
        // column order is kept
        assert_eq!(
            first.as_object().unwrap().keys().collect::<Vec<_>>(),
            vec!["value", "_dlt_parent_id"]
        );

        let blocks = std::fs::read_to_string(dir.path().join("out/blocks.jsonl")).unwrap();
        assert_eq!(blocks.lines().count(), 2);

        let mut tables: Vec<_> = writer.tables().collect();
        tables.sort();
        assert_eq!(tables, vec!["blocks", "blocks__uncles"]);
    }
}
