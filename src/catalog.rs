//! Table-name expansion
//!
//! Queries may target tables through wildcard patterns (`web-*`). A record
//! captured before the real table existed stores the pattern; later lookups
//! expand it against the current catalog and memoize the concrete names.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeSet;

/// Maximum accepted pattern length
const MAX_PATTERN_LEN: usize = 1000;

/// Resolves table-name patterns to concrete table names
pub trait TableExpander: Send + Sync {
    /// Concrete tables matching `pattern`
    ///
    /// A pattern without `*` expands to itself.
    fn expand(&self, pattern: &str) -> Vec<String>;
}

/// True when `name` contains a wildcard
pub fn is_pattern(name: &str) -> bool {
    name.contains('*')
}

/// Compile a `*` glob into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    if pattern.len() > MAX_PATTERN_LEN {
        return None;
    }
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body)).ok()
}

/// In-memory table catalog
///
/// The server keeps it in sync with the tables the engine knows about.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    tables: RwLock<BTreeSet<String>>,
}

impl StaticCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog seeded with `tables`
    pub fn with_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: RwLock::new(tables.into_iter().map(Into::into).collect()),
        }
    }

    /// Register a table
    pub fn add_table(&self, name: impl Into<String>) {
        self.tables.write().insert(name.into());
    }

    /// Forget a table
    pub fn remove_table(&self, name: &str) -> bool {
        self.tables.write().remove(name)
    }

    /// Number of known tables
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// True when no table is known
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

impl TableExpander for StaticCatalog {
    fn expand(&self, pattern: &str) -> Vec<String> {
        if !is_pattern(pattern) {
            return vec![pattern.to_string()];
        }
        let Some(re) = glob_to_regex(pattern) else {
            tracing::warn!(pattern = %pattern, "Ignoring unusable table pattern");
            return Vec::new();
        };
        self.tables
            .read()
            .iter()
            .filter(|t| re.is_match(t))
            .cloned()
            .collect()
    }
}
