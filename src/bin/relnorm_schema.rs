//! relnorm-schema: Validate a schema and report how records will be normalized
//!
//! Prints the resolved table tree, effective column hints, propagation steps
//! and version hash status as JSON.
//!
//! Usage:
//!   relnorm-schema schemas/ethereum.schema.yaml
//!
//!   # Fail when the stored version hash does not match the content
//!   relnorm-schema --check eth.yaml
//!
//!   # Print the schema with a recomputed hash (and bumped version if it drifted)
//!   relnorm-schema --rehash eth.yaml > eth.fixed.yaml

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use relnorm::normalize::PropagationPlan;
use relnorm::schema::{Schema, StoredSchema};
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "relnorm-schema")]
#[command(about = "Validate a relational normalization schema", long_about = None)]
struct Args {
    /// Schema file (.yaml/.yml or .json)
    #[arg(value_name = "FILE")]
    schema: String,

    /// Exit with an error when the stored version hash does not match the content
    #[arg(long)]
    check: bool,

    /// Print the schema document with a recomputed version hash instead of the report
    #[arg(long, conflicts_with = "check")]
    rehash: bool,

    /// Compact output (no pretty-printing)
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stored = StoredSchema::from_path(&args.schema)?;
    let declared_hash = stored.version_hash.clone();
    let schema = Schema::resolve(stored)?;

    if args.rehash {
        print!("{}", schema.stored().to_yaml()?);
        return Ok(());
    }

    let report = report(&schema, declared_hash);
    let output = if args.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{}", output);

    if args.check && schema.hash_drift() {
        anyhow::bail!(
            "schema `{}` content does not match its version hash",
            schema.name()
        );
    }

    Ok(())
}

fn report(schema: &Schema, declared_hash: Option<String>) -> Value {
    let plan = PropagationPlan::build(schema);

    let tables: Vec<Value> = schema
        .tables()
        .map(|table| {
            let ancestors: Vec<&str> = table
                .ancestors
                .iter()
                .map(|&i| schema.table_at(i).name.as_str())
                .collect();
            let children: Vec<&str> = table
                .children
                .iter()
                .map(|&i| schema.table_at(i).name.as_str())
                .collect();
            let columns: Vec<Value> = table
                .columns()
                .iter()
                .map(|c| json!({"name": c.name, "data_type": c.data_type, "hints": c.hints}))
                .collect();
            let required: Vec<Value> = table
                .required_columns()
                .map(|(c, hint)| json!({"column": c.name, "hint": hint}))
                .collect();

            json!({
                "name": table.name,
                "path": schema.naming().break_path(&table.name),
                "ancestors": ancestors,
                "children": children,
                "write_disposition": table.write_disposition,
                "sealed": table.sealed,
                "columns": columns,
                "required": required,
                "propagation": plan.steps(&table.name),
            })
        })
        .collect();

    json!({
        "name": schema.name(),
        "version": schema.version(),
        "engine_version": schema.engine_version(),
        "version_hash": {
            "declared": declared_hash,
            "computed": schema.version_hash(),
            "drift": schema.hash_drift(),
        },
        "sealed": schema.is_sealed(),
        "default_root_table": schema.default_root_table(),
        "max_nesting": schema.max_nesting(),
        "tables": tables,
    })
}
