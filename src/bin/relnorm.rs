//! relnorm: Normalize nested JSON into relational tables under a schema
//!
//! Usage:
//!   # Single tagged stream to stdout
//!   relnorm --schema schemas/ethereum.schema.yaml block.json
//!
//!   # NDJSON from stdin, one .jsonl file per table
//!   cat blocks.jsonl | relnorm --schema eth.yaml --output-dir ./tables
//!
//!   # Keep the tables and columns discovered along the way
//!   relnorm --schema eth.yaml blocks.json -o ./tables --evolved-schema eth.next.yaml

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use relnorm::normalize::{NormalizeStats, Normalizer, RowSink, SingleWriter, TableWriter};
use relnorm::read_records;
use relnorm::schema::{Schema, StoredSchema};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "relnorm")]
#[command(about = "Normalize nested JSON into relational tables", long_about = None)]
struct Args {
    /// Schema file (.yaml/.yml or .json)
    #[arg(long, short = 's')]
    schema: String,

    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Treat the input as newline-delimited JSON without trying whole-document parsing
    #[arg(long)]
    ndjson: bool,

    /// Root table for the records (default: the schema's root table)
    #[arg(long, short = 't')]
    table: Option<String>,

    /// Output directory for separate .jsonl files per table
    /// If omitted, writes to stdout as a single stream tagged with `_table`
    #[arg(long, short = 'o')]
    output_dir: Option<String>,

    /// Seed for reproducible row ids
    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads normalizing records (default: 1)
    #[arg(long, short = 'j', default_value_t = 1)]
    workers: usize,

    /// Load id stamped on every root row as `_dlt_load_id`
    #[arg(long)]
    load_id: Option<String>,

    /// Nesting level from which objects and lists are stored as json (overrides the schema)
    #[arg(long)]
    max_nesting: Option<usize>,

    /// Write the schema with all discovered tables and columns to this path
    #[arg(long)]
    evolved_schema: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stored = StoredSchema::from_path(&args.schema)?;
    let schema = Arc::new(Schema::resolve(stored)?);
    log::info!(
        "loaded schema `{}` v{} ({} tables)",
        schema.name(),
        schema.version(),
        schema.tables().count()
    );

    let mut normalizer = Normalizer::new(schema.clone());
    if let Some(seed) = args.seed {
        normalizer = normalizer.with_seed(seed);
    }
    if let Some(load_id) = &args.load_id {
        normalizer = normalizer.with_load_id(load_id.clone());
    }
    if args.max_nesting.is_some() {
        normalizer = normalizer.with_max_nesting(args.max_nesting);
    }

    let records = read_records(open_input(args.input.as_deref())?, args.ndjson)?;
    log::info!("read {} records", records.len());

    let stats = if let Some(output_dir) = &args.output_dir {
        let mut writer = TableWriter::new(output_dir)?;
        let stats = run(&normalizer, records, &args, &mut writer)?;
        log::info!("wrote tables to {}", writer.dir().display());
        stats
    } else {
        let mut writer = SingleWriter::new(std::io::stdout().lock());
        run(&normalizer, records, &args, &mut writer)?
    };

    log::info!(
        "normalized {} records into {} rows ({} anomalies, {} rejected rows, {} failed records)",
        stats.records,
        stats.rows,
        stats.anomalies,
        stats.rejected_rows,
        stats.failed_records
    );

    if let Some(path) = &args.evolved_schema {
        let evolved = schema.apply_update(&stats.schema_update)?;
        let yaml = evolved.stored().to_yaml()?;
        std::fs::write(path, yaml).with_context(|| format!("Failed to write {}", path))?;
        log::info!("wrote schema v{} to {}", evolved.version(), path);
    }

    Ok(())
}

/// Normalize all records, in parallel when asked to, and write batches in input order
fn run<S: RowSink>(
    normalizer: &Normalizer,
    records: Vec<Value>,
    args: &Args,
    sink: &mut S,
) -> Result<NormalizeStats> {
    let mut stats = NormalizeStats::default();

    let results = normalizer.normalize_parallel(records, args.table.as_deref(), args.workers);
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(batch) => {
                for anomaly in batch.anomalies() {
                    log::debug!("record {}: {}", i, anomaly);
                }
                sink.write_batch(&batch)?;
                stats.absorb(&batch);
            }
            Err(e) => {
                log::warn!("record {}: {}", i, e);
                stats.failed_records += 1;
            }
        }
    }

    sink.flush()?;
    Ok(stats)
}

fn open_input(input: Option<&str>) -> Result<Box<dyn Read>> {
    let reader: Box<dyn Read> = match input {
        Some(file_path) => {
            let file =
                File::open(file_path).with_context(|| format!("Failed to open {}", file_path))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(std::io::stdin()),
    };
    Ok(reader)
}
