//! # relnorm - relational normalization of nested JSON
//!
//! Flattens nested records (Ethereum blocks with their transactions, logs and
//! topics, say) into a set of parent/child tables described by a schema.
//!
//! ## Modules
//!
//! - **schema**: schema documents, validation, hints, naming and evolution
//! - **normalize**: the flattener, row ids, propagation and row sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use relnorm::schema::{Schema, StoredSchema};
//! use relnorm::normalize::Normalizer;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let stored = StoredSchema::from_yaml_str(r#"
//! name: blog
//! tables:
//!   users:
//!     columns:
//!       id: {data_type: bigint, primary_key: true}
//! "#)?;
//! let normalizer = Normalizer::new(Arc::new(Schema::resolve(stored)?));
//!
//! let batch = normalizer.normalize(json!({
//!     "id": 1,
//!     "profile": {"city": "Oslo"},
//!     "posts": [{"title": "First"}, {"title": "Second"}]
//! }))?;
//!
//! // users (id, profile__city) and users__posts (title, linked by _dlt_parent_id)
//! assert_eq!(batch.rows("users")[0].get("profile__city").unwrap(), "Oslo");
//! assert_eq!(batch.rows("users__posts").len(), 2);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::{BufRead, Read};

pub mod error;
pub mod normalize;
pub mod schema;

pub use error::{NormalizeError, RowIntegrityError, SchemaIntegrityError};
pub use normalize::{
    Anomaly, FieldAnomaly, NormalizeStats, Normalizer, RowSink, SingleWriter, TableBatch,
    TableWriter,
};
pub use schema::{Schema, SchemaUpdate, StoredSchema};

/// Main entry point: normalize an NDJSON stream into a sink.
///
/// Records that cannot be normalized at all are logged and counted; row-level
/// anomalies are logged and reported in the returned stats.
pub fn normalize_json<R: BufRead, S: RowSink>(
    reader: R,
    normalizer: &Normalizer,
    sink: &mut S,
) -> Result<NormalizeStats> {
    let mut stats = NormalizeStats::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read line")?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse JSON on line {}", line_no + 1))?;

        match normalizer.normalize(value) {
            Ok(batch) => {
                for anomaly in batch.anomalies() {
                    log::debug!("line {}: {}", line_no + 1, anomaly);
                }
                sink.write_batch(&batch)?;
                stats.absorb(&batch);
            }
            Err(e) => {
                log::warn!("line {}: {}", line_no + 1, e);
                stats.failed_records += 1;
            }
        }
    }

    sink.flush()?;
    Ok(stats)
}

/// Read a JSON document, a JSON array of records, or NDJSON from `reader`
pub fn read_records<R: Read>(mut reader: R, ndjson: bool) -> Result<Vec<Value>> {
    let mut content = Vec::new();
    reader
        .read_to_end(&mut content)
        .context("Failed to read input")?;
    parse_records(&content, ndjson)
}

/// Parse records using SIMD-accelerated parsing when possible.
///
/// A JSON array yields its elements and a single document yields itself. Both
/// deserialize straight into `serde_json::Value`, so object keys keep their
/// order. Anything simd-json cannot parse as one document is read as NDJSON,
/// where a line that is not valid JSON fails with its line number.
pub fn parse_records(content: &[u8], ndjson: bool) -> Result<Vec<Value>> {
    if !ndjson {
        // simd-json parses in place, keep the original bytes for the fallback
        let mut scratch = content.to_vec();
        match simd_json::serde::from_slice::<Value>(&mut scratch) {
            Ok(Value::Array(items)) => return Ok(items),
            Ok(document) => return Ok(vec![document]),
            Err(e) => log::debug!("not a single JSON document ({}), reading as NDJSON", e),
        }
    }

    content
        .split(|&b| b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
        .map(|(i, line)| {
            serde_json::from_slice(line)
                .with_context(|| format!("Failed to parse JSON on line {}", i + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    const ETH_SCHEMA: &str = include_str!("../schemas/ethereum.schema.yaml");

    #[test]
    fn test_normalize_stream() {
        let schema = Schema::resolve(StoredSchema::from_yaml_str(ETH_SCHEMA).unwrap()).unwrap();
        let normalizer = Normalizer::new(Arc::new(schema)).with_seed(3);

        let input = concat!(
            r#"{"number": 1, "hash": "0x1", "timestamp": "2023-01-01T00:00:00Z", "#,
            r#""transactions": [{"hash": "0xa", "nonce_hex": "0x0"}]}"#,
            "\n\n",
            r#"{"number": 2, "hash": "0x2", "timestamp": "2023-01-01T00:00:12Z", "#,
            r#""uncles": ["0xu"], "gossip": true}"#,
            "\n",
            r#"{"hash": "0x3", "timestamp": "2023-01-01T00:00:24Z"}"#,
            "\n"
        );

        let mut sink = SingleWriter::new(Vec::new());
        let stats = normalize_json(Cursor::new(input), &normalizer, &mut sink).unwrap();

        assert_eq!(stats.records, 3);
        assert_eq!(stats.failed_records, 0);
        assert_eq!(stats.rows, 4);
        // dropped `gossip` plus the rejected third block
        assert_eq!(stats.anomalies, 2);
        assert_eq!(stats.rejected_rows, 1);
        assert_eq!(stats.schema_update.columns().len(), 1);
        assert_eq!(stats.schema_update.columns()[0].name, "nonce_hex");

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(output.lines().count(), 4);
    }

    #[test]
    fn test_invalid_json_fails_stream() {
        let schema = Schema::resolve(StoredSchema::new("s")).unwrap();
        let normalizer = Normalizer::new(Arc::new(schema));
        let mut sink = SingleWriter::new(Vec::new());

        let err = normalize_json(Cursor::new("{not json}\n"), &normalizer, &mut sink).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_failed_records_are_counted() {
        // no tables, so there is no default root table
        let schema = Schema::resolve(StoredSchema::new("s")).unwrap();
        let normalizer = Normalizer::new(Arc::new(schema));
        let mut sink = SingleWriter::new(Vec::new());

        let stats = normalize_json(Cursor::new("{\"a\": 1}\n"), &normalizer, &mut sink).unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(stats.failed_records, 1);
    }

    #[test]
    fn test_parse_records_keeps_key_order() {
        let keys: Vec<String> = (0..40).map(|i| format!("f{:02}", i)).collect();
        let fields: Vec<String> = keys.iter().map(|k| format!("\"{}\": 1", k)).collect();
        let document = format!("{{{}}}", fields.join(", "));

        let records = parse_records(document.as_bytes(), false).unwrap();
        assert_eq!(records.len(), 1);
        let parsed: Vec<&String> = records[0].as_object().unwrap().keys().collect();
        assert_eq!(parsed, keys.iter().collect::<Vec<_>>());

        let schema = Schema::resolve(StoredSchema::new("wide")).unwrap();
        let normalizer = Normalizer::new(Arc::new(schema));
        let batch = normalizer
            .normalize_into(records.into_iter().next().unwrap(), "t")
            .unwrap();

        let columns: Vec<&str> = batch.rows("t")[0].data.keys().map(String::as_str).collect();
        assert_eq!(&columns[..40], keys.iter().map(String::as_str).collect::<Vec<_>>());
        let discovered: Vec<&str> = batch
            .schema_update()
            .columns()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(&discovered[..40], &columns[..40]);
    }

    #[test]
    fn test_parse_records_shapes() {
        let array = parse_records(br#"[{"a": 1}, {"a": 2}]"#, false).unwrap();
        assert_eq!(array.len(), 2);

        let lines = parse_records(b"{\"a\": 1}\r\n\n{\"a\": 2}\n", false).unwrap();
        assert_eq!(lines, vec![serde_json::json!({"a": 1}), serde_json::json!({"a": 2})]);

        // forced NDJSON reads a one-line array as a single record
        let forced = read_records(Cursor::new(r#"[1, 2]"#), true).unwrap();
        assert_eq!(forced, vec![serde_json::json!([1, 2])]);

        assert!(parse_records(b"", false).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_utf8_line_fails() {
        let input = b"{\"a\": 1}\n{\"a\": \"\xff\"}\n";
        let err = parse_records(input, false).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{}", err);
    }
}
