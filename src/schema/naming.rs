//! Naming conventions for table and column identifiers

use crate::error::SchemaIntegrityError;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::sync::Arc;

pub const PATH_SEPARATOR: &str = "__";

/// Identifier used for empty or blank keys
pub const EMPTY_KEY_IDENTIFIER: &str = "_empty";

static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_]+").unwrap());

static SNAKE_CASE_BREAK_1: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^_])([A-Z][a-z]+)").unwrap());

static SNAKE_CASE_BREAK_2: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());

static LEADING_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+").unwrap());

static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"__+").unwrap());

/// Turns source keys into identifiers and joins identifiers into paths.
///
/// Normalized identifiers never contain the path separator, so a path can always
/// be split back into its parts.
pub trait NamingConvention: Send + Sync + Debug {
    fn normalize_identifier(&self, identifier: &str) -> String;

    fn path_separator(&self) -> &str {
        PATH_SEPARATOR
    }

    /// Join already normalized identifiers, skipping empty ones
    fn make_path(&self, parts: &[&str]) -> String {
        parts
            .iter()
            .filter(|p| !p.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(self.path_separator())
    }

    fn break_path(&self, path: &str) -> Vec<String> {
        path.split(self.path_separator())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// `snake_case` identifiers made of `[a-z0-9_]`
#[derive(Debug, Clone, Default)]
pub struct SnakeCase {
    /// Longer identifiers are cut and tagged with a hash of the original
    pub max_length: Option<usize>,
}

impl SnakeCase {
    pub fn new() -> Self {
        SnakeCase { max_length: None }
    }

    pub fn with_max_length(max_length: usize) -> Self {
        SnakeCase {
            max_length: Some(max_length),
        }
    }

    fn to_snake_case(identifier: &str) -> String {
        let ident = SNAKE_CASE_BREAK_1.replace_all(identifier, "${1}_${2}");
        let mut ident = SNAKE_CASE_BREAK_2
            .replace_all(&ident, "${1}_${2}")
            .to_lowercase();

        if LEADING_DIGITS.is_match(&ident) {
            ident.insert(0, '_');
        }

        // trailing underscores would merge with the path separator
        let stripped = ident.trim_end_matches('_');
        let strip_count = ident.len() - stripped.len();
        let ident = format!("{}{}", stripped, "x".repeat(strip_count));

        UNDERSCORES.replace_all(&ident, "_").into_owned()
    }

    fn shorten(&self, normalized: String, original: &str) -> String {
        let Some(max_length) = self.max_length else {
            return normalized;
        };
        if normalized.len() <= max_length {
            return normalized;
        }

        let digest = Sha256::digest(original.as_bytes());
        let mut tag: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
        tag.truncate(max_length);
        // identifiers are ascii at this point, byte slicing is safe
        let keep = max_length - tag.len();
        format!("{}{}", &normalized[..keep], tag)
    }
}

impl NamingConvention for SnakeCase {
    fn normalize_identifier(&self, identifier: &str) -> String {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return EMPTY_KEY_IDENTIFIER.to_string();
        }

        let translated: String = identifier
            .chars()
            .map(|c| match c {
                '+' => 'x',
                '-' | '*' => '_',
                '@' => 'a',
                '|' => 'l',
                other => other,
            })
            .collect();
        let replaced = NON_ALPHANUMERIC.replace_all(&translated, "_");

        self.shorten(Self::to_snake_case(&replaced), identifier)
    }
}

/// Resolve the `normalizers.names` reference of a schema
pub fn naming_from_reference(
    names: &str,
    max_length: Option<usize>,
) -> Result<Arc<dyn NamingConvention>, SchemaIntegrityError> {
    let short = names.rsplit('.').next().unwrap_or(names);
    match short {
        "snake_case" => Ok(Arc::new(SnakeCase { max_length })),
        _ => Err(SchemaIntegrityError::UnknownNamingConvention {
            names: names.to_string(),
        }),
    }
}
