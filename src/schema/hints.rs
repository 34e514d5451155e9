//! Column hint aggregation
//!
//! A column's effective hints come from three places, most specific first:
//! explicit hints on the column declaration, `default_hints` entries naming the
//! column exactly, and `default_hints` entries given as `re:` patterns.

use crate::error::SchemaIntegrityError;
use crate::schema::stored::{ColumnDef, SchemaSettings};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

const PATTERN_PREFIX: &str = "re:";

/// A single column hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnHint {
    PrimaryKey,
    Unique,
    ForeignKey,
    Cluster,
    Sort,
    Partition,
    RootKey,
    NotNull,
}

impl ColumnHint {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnHint::PrimaryKey => "primary_key",
            ColumnHint::Unique => "unique",
            ColumnHint::ForeignKey => "foreign_key",
            ColumnHint::Cluster => "cluster",
            ColumnHint::Sort => "sort",
            ColumnHint::Partition => "partition",
            ColumnHint::RootKey => "root_key",
            ColumnHint::NotNull => "not_null",
        }
    }

    const ALL: [ColumnHint; 8] = [
        ColumnHint::PrimaryKey,
        ColumnHint::Unique,
        ColumnHint::ForeignKey,
        ColumnHint::Cluster,
        ColumnHint::Sort,
        ColumnHint::Partition,
        ColumnHint::RootKey,
        ColumnHint::NotNull,
    ];

    /// The explicit value of this hint on a column declaration
    fn explicit(self, column: &ColumnDef) -> Option<bool> {
        match self {
            ColumnHint::PrimaryKey => column.primary_key,
            ColumnHint::Unique => column.unique,
            ColumnHint::ForeignKey => column.foreign_key,
            ColumnHint::Cluster => column.cluster,
            ColumnHint::Sort => column.sort,
            ColumnHint::Partition => column.partition,
            ColumnHint::RootKey => column.root_key,
            ColumnHint::NotNull => column.nullable.map(|n| !n),
        }
    }
}

impl fmt::Display for ColumnHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnHint {
    type Err = SchemaIntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColumnHint::ALL
            .into_iter()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| SchemaIntegrityError::UnknownHint {
                hint: s.to_string(),
            })
    }
}

/// Final constraints of a column after merging explicit and default hints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HintSet {
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub foreign_key: bool,
    pub cluster: bool,
    pub sort: bool,
    pub partition: bool,
    pub root_key: bool,
}

impl Default for HintSet {
    fn default() -> Self {
        HintSet {
            nullable: true,
            primary_key: false,
            unique: false,
            foreign_key: false,
            cluster: false,
            sort: false,
            partition: false,
            root_key: false,
        }
    }
}

impl HintSet {
    pub fn has(&self, hint: ColumnHint) -> bool {
        match hint {
            ColumnHint::PrimaryKey => self.primary_key,
            ColumnHint::Unique => self.unique,
            ColumnHint::ForeignKey => self.foreign_key,
            ColumnHint::Cluster => self.cluster,
            ColumnHint::Sort => self.sort,
            ColumnHint::Partition => self.partition,
            ColumnHint::RootKey => self.root_key,
            ColumnHint::NotNull => !self.nullable,
        }
    }

    fn set(&mut self, hint: ColumnHint, on: bool) {
        match hint {
            ColumnHint::PrimaryKey => self.primary_key = on,
            ColumnHint::Unique => self.unique = on,
            ColumnHint::ForeignKey => self.foreign_key = on,
            ColumnHint::Cluster => self.cluster = on,
            ColumnHint::Sort => self.sort = on,
            ColumnHint::Partition => self.partition = on,
            ColumnHint::RootKey => self.root_key = on,
            ColumnHint::NotNull => self.nullable = !on,
        }
    }

    /// The hint that makes a value mandatory in every row, if any
    pub fn required_by(&self) -> Option<ColumnHint> {
        [ColumnHint::PrimaryKey, ColumnHint::Unique]
            .into_iter()
            .find(|&hint| self.has(hint))
    }
}

/// Matches a column (or table) name either literally or with a `re:` regex
#[derive(Debug, Clone)]
pub enum NameMatcher {
    Exact(String),
    Pattern(Regex),
}

impl NameMatcher {
    pub fn parse(entry: &str) -> Result<Self, SchemaIntegrityError> {
        match entry.strip_prefix(PATTERN_PREFIX) {
            Some(pattern) => Regex::new(pattern)
                .map(NameMatcher::Pattern)
                .map_err(|e| SchemaIntegrityError::InvalidPattern {
                    pattern: pattern.to_string(),
                    error: e.to_string(),
                }),
            None => Ok(NameMatcher::Exact(entry.to_string())),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Exact(s) => s == name,
            NameMatcher::Pattern(re) => re.is_match(name),
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, NameMatcher::Exact(_))
    }
}

#[derive(Debug)]
struct DefaultHintRule {
    hint: ColumnHint,
    matcher: NameMatcher,
}

/// Merges explicit column hints with schema-wide default hints.
///
/// Results are cached per `(table, column)` since the schema never changes
/// during a session.
#[derive(Debug)]
pub struct HintAggregator {
    // exact matchers first, then patterns, each in declaration order
    rules: Vec<DefaultHintRule>,
    cache: RwLock<HashMap<(String, String), HintSet>>,
}

impl HintAggregator {
    pub fn from_settings(settings: &SchemaSettings) -> Result<Self, SchemaIntegrityError> {
        let mut exact = Vec::new();
        let mut patterns = Vec::new();

        for (hint_name, names) in settings.default_hints.iter() {
            let hint: ColumnHint = hint_name.parse()?;
            for name in names {
                let matcher = NameMatcher::parse(name)?;
                let rule = DefaultHintRule { hint, matcher };
                if rule.matcher.is_exact() {
                    exact.push(rule);
                } else {
                    patterns.push(rule);
                }
            }
        }

        exact.extend(patterns);
        Ok(HintAggregator {
            rules: exact,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Value a default rule assigns to `hint` for `column`, if any rule matches
    fn default_for(&self, hint: ColumnHint, column: &str) -> Option<bool> {
        self.rules
            .iter()
            .find(|r| r.hint == hint && r.matcher.matches(column))
            .map(|_| true)
    }

    fn merge(&self, column: &str, explicit: Option<&ColumnDef>) -> HintSet {
        let mut hints = HintSet::default();

        for hint in ColumnHint::ALL {
            let value = explicit
                .and_then(|c| hint.explicit(c))
                .or_else(|| self.default_for(hint, column));
            if let Some(on) = value {
                hints.set(hint, on);
            }
        }

        if hints.primary_key {
            hints.nullable = false;
        }
        hints
    }

    /// Effective hints of `column` in `table`, given its declaration (if declared)
    pub fn effective_hints(
        &self,
        table: &str,
        column: &str,
        explicit: Option<&ColumnDef>,
    ) -> HintSet {
        let key = (table.to_string(), column.to_string());
        if let Ok(cache) = self.cache.read() {
            if let Some(hints) = cache.get(&key) {
                return *hints;
            }
        }

        let hints = self.merge(column, explicit);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, hints);
        }
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ordered::OrderedMap;

    fn settings(hints: &[(&str, &[&str])]) -> SchemaSettings {
        let mut default_hints = OrderedMap::new();
        for (hint, names) in hints {
            default_hints.insert(*hint, names.iter().map(|s| s.to_string()).collect());
        }
        SchemaSettings {
            default_hints,
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_and_pattern_defaults() {
        let agg = HintAggregator::from_settings(&settings(&[
            ("unique", &["_dlt_id"]),
            ("not_null", &["re:^_dlt_"]),
            ("partition", &["block_timestamp"]),
        ]))
        .unwrap();

        let id = agg.effective_hints("t", "_dlt_id", None);
        assert!(id.unique);
        assert!(!id.nullable);

        let parent = agg.effective_hints("t", "_dlt_parent_id", None);
        assert!(!parent.unique);
        assert!(!parent.nullable);

        let ts = agg.effective_hints("t", "block_timestamp", None);
        assert!(ts.partition);
        assert!(ts.nullable);
    }

    #[test]
    fn test_explicit_wins_over_default() {
        let agg =
            HintAggregator::from_settings(&settings(&[("cluster", &["block_hash"])])).unwrap();
        let explicit = ColumnDef {
            cluster: Some(false),
            ..Default::default()
        };
        assert!(!agg.effective_hints("t", "block_hash", Some(&explicit)).cluster);
        assert!(agg.effective_hints("u", "block_hash", None).cluster);
    }

    #[test]
    fn test_primary_key_implies_not_null() {
        let agg = HintAggregator::from_settings(&SchemaSettings::default()).unwrap();
        let explicit = ColumnDef {
            primary_key: Some(true),
            nullable: Some(true),
            ..Default::default()
        };
        let hints = agg.effective_hints("t", "number", Some(&explicit));
        assert!(hints.primary_key);
        assert!(!hints.nullable);
        assert!(hints.has(ColumnHint::NotNull));
        assert_eq!(hints.required_by(), Some(ColumnHint::PrimaryKey));
    }

    #[test]
    fn test_unknown_hint_and_bad_pattern() {
        let err = HintAggregator::from_settings(&settings(&[("indexed", &["x"])])).unwrap_err();
        assert!(matches!(err, SchemaIntegrityError::UnknownHint { .. }));

        let err = HintAggregator::from_settings(&settings(&[("unique", &["re:(unclosed"])]))
            .unwrap_err();
        assert!(matches!(err, SchemaIntegrityError::InvalidPattern { .. }));
    }
}
