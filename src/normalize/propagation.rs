//! Column propagation from ancestor rows to descendant rows
//!
//! Rules come in two scopes. `root` rules copy a column of every root row into
//! all of its descendants; table rules copy a column of a named table's rows into
//! that table's descendants. When two rules target the same column, the one whose
//! source table is closer to the receiving row wins.
//!
//! Values are taken from the source row as it came out of the record (plus its
//! synthetic columns), never from values that row itself received by propagation.

use crate::schema::{OrderedMap, Schema};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationScope {
    Root,
    Table(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationRule {
    pub scope: PropagationScope,
    pub source_column: String,
    pub target_column: String,
}

/// A rule as seen from a receiving table: which ancestor row the value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationStep {
    pub source_table: String,
    pub source_column: String,
    pub target_column: String,
}

/// Values a row hands down to its descendants, keyed by target column
pub type Propagated = Arc<OrderedMap<Value>>;

#[derive(Debug, Clone, Default)]
pub struct PropagationPlan {
    root: Vec<PropagationRule>,
    by_table: HashMap<String, Vec<PropagationRule>>,
    steps: HashMap<String, Vec<PropagationStep>>,
}

impl PropagationPlan {
    /// Precompute the propagation rules of every declared table
    pub fn build(schema: &Schema) -> Self {
        let config = &schema.config().propagation;

        let root: Vec<PropagationRule> = config
            .root
            .iter()
            .map(|(source, target)| PropagationRule {
                scope: PropagationScope::Root,
                source_column: source.to_string(),
                target_column: target.clone(),
            })
            .collect();

        let by_table: HashMap<String, Vec<PropagationRule>> = config
            .tables
            .iter()
            .map(|(table, rules)| {
                let rules = rules
                    .iter()
                    .map(|(source, target)| PropagationRule {
                        scope: PropagationScope::Table(table.to_string()),
                        source_column: source.to_string(),
                        target_column: target.clone(),
                    })
                    .collect();
                (table.to_string(), rules)
            })
            .collect();

        let mut plan = PropagationPlan {
            root,
            by_table,
            steps: HashMap::new(),
        };

        for table in schema.tables() {
            let ancestors = schema.ancestors(&table.name);
            let mut composed: OrderedMap<PropagationStep> = OrderedMap::new();

            // strict ancestors only, root first so closer scopes overwrite
            for ancestor in ancestors.iter().take(ancestors.len().saturating_sub(1)) {
                for rule in plan.outgoing(&ancestor.name, ancestor.is_root()) {
                    composed.insert(
                        rule.target_column.clone(),
                        PropagationStep {
                            source_table: ancestor.name.clone(),
                            source_column: rule.source_column.clone(),
                            target_column: rule.target_column.clone(),
                        },
                    );
                }
            }

            plan.steps
                .insert(table.name.clone(), composed.into_iter().map(|(_, s)| s).collect());
        }

        log::debug!(
            "propagation plan: {} root rules, {} table scopes",
            plan.root.len(),
            plan.by_table.len()
        );
        plan
    }

    /// Rules whose values a row of `table` hands down: root rules first, then the table's own
    pub fn outgoing<'a>(
        &'a self,
        table: &str,
        is_root: bool,
    ) -> impl Iterator<Item = &'a PropagationRule> + 'a {
        let root: &[PropagationRule] = if is_root { &self.root } else { &[] };
        let own = self.by_table.get(table).map(Vec::as_slice).unwrap_or(&[]);
        root.iter().chain(own.iter())
    }

    /// Composed rules a row of declared `table` receives, in application order
    pub fn steps(&self, table: &str) -> &[PropagationStep] {
        self.steps.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Values the descendants of a row receive: the inherited ones, overridden by
    /// whatever this row's own rules pick up.
    pub fn descend(
        &self,
        inherited: &Propagated,
        table: &str,
        is_root: bool,
        row: &Map<String, Value>,
    ) -> Propagated {
        let mut picked = self.outgoing(table, is_root).filter_map(|rule| {
            row.get(&rule.source_column)
                .filter(|v| !v.is_null())
                .map(|v| (rule.target_column.clone(), v.clone()))
        });

        let Some(first) = picked.next() else {
            return Arc::clone(inherited);
        };

        let mut values = OrderedMap::clone(inherited);
        values.insert(first.0, first.1);
        for (target, value) in picked {
            values.insert(target, value);
        }
        Arc::new(values)
    }
}
