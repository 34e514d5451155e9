//! Schema model
//!
//! A schema document ([`StoredSchema`]) is resolved once into an immutable
//! [`Schema`]: tables in an arena with ancestor chains, columns with their
//! effective hints, the naming convention and the normalizer settings.

pub mod data_type;
pub mod evolution;
pub mod hash;
pub mod hints;
pub mod naming;
pub mod ordered;
pub mod resolved;
pub mod stored;

pub use data_type::DataType;
pub use evolution::{NewColumn, NewTable, SchemaUpdate};
pub use hash::version_hash;
pub use hints::{ColumnHint, HintAggregator, HintSet};
pub use naming::{NamingConvention, SnakeCase};
pub use ordered::OrderedMap;
pub use resolved::{Column, Schema, Table, TableIdx};
pub use stored::{ColumnDef, PropagationConfig, StoredSchema, TableDef, WriteDisposition};
