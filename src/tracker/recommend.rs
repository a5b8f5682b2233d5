//! Column recommendation
//!
//! Ranks group-by, measure and sort columns for a table from three sources:
//! built-in schema seeds, administrator overrides and the usage of promoted
//! aggregations.

use crate::error::OverrideError;
use crate::query::aggs::QueryAggregators;
use crate::query::ast::WILDCARD;
use crate::query::columns::ColumnUsage;
use crate::tracker::registry::TrackedQuery;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Table-name prefix of tracing-schema tables
const TRACING_TABLE_PREFIX: &str = "jaeger-";

// ============================================================================
// Overrides
// ============================================================================

/// Administrator-chosen columns for one table
///
/// Columns keep their insertion order and never repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupByOverride {
    /// Group-by columns in priority order
    #[serde(default)]
    pub group_by_cols: Vec<String>,
    /// Measure columns
    #[serde(default)]
    pub measure_cols: Vec<String>,
}

impl GroupByOverride {
    /// Union `other` into `self`, keeping existing order
    pub fn merge(&mut self, other: &GroupByOverride) {
        push_unique(&mut self.group_by_cols, &other.group_by_cols);
        push_unique(&mut self.measure_cols, &other.measure_cols);
    }
}

fn push_unique(into: &mut Vec<String>, cols: &[String]) {
    for c in cols {
        if !into.contains(c) {
            into.push(c.clone());
        }
    }
}

/// Per-table overrides behind their own lock
#[derive(Debug, Default)]
pub struct OverrideStore {
    inner: RwLock<HashMap<String, GroupByOverride>>,
}

impl OverrideStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `cols` into the override for `table`
    pub fn set(&self, table: &str, cols: &GroupByOverride) -> Result<(), OverrideError> {
        if table == WILDCARD {
            return Err(OverrideError::WildcardTable);
        }
        if table.is_empty() {
            return Err(OverrideError::MissingTableName);
        }
        self.inner
            .write()
            .entry(table.to_string())
            .or_default()
            .merge(cols);
        Ok(())
    }

    /// Override for `table`
    pub fn get(&self, table: &str) -> Option<GroupByOverride> {
        self.inner.read().get(table).cloned()
    }

    /// Copy of every override, for persistence
    pub fn snapshot(&self) -> HashMap<String, GroupByOverride> {
        self.inner.read().clone()
    }

    /// Replace every override with loaded state
    pub fn replace_all(&self, overrides: HashMap<String, GroupByOverride>) {
        *self.inner.write() = overrides;
    }

    /// Remove every override
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Number of tables with an override
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when no override exists
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Parse the admin body `{"tableName": .., "groupByColumns": [..], "measureColumns": [..]}`
///
/// Nothing is applied here; a rejected body leaves the store untouched.
pub fn parse_override_body(body: &Value) -> Result<(String, GroupByOverride), OverrideError> {
    let obj = body
        .as_object()
        .ok_or_else(|| OverrideError::InvalidBody(format!("expected an object, got {}", json_type(body))))?;

    let mut table = None;
    let mut cols = GroupByOverride::default();

    for (key, value) in obj {
        match key.as_str() {
            "tableName" => match value {
                Value::String(s) => table = Some(s.clone()),
                _ => return Err(OverrideError::InvalidKey(key.clone())),
            },
            "groupByColumns" => cols.group_by_cols = string_list(key, value)?,
            "measureColumns" => cols.measure_cols = string_list(key, value)?,
            _ => return Err(OverrideError::InvalidKey(key.clone())),
        }
    }

    let table = table.ok_or(OverrideError::MissingTableName)?;
    if table == WILDCARD {
        return Err(OverrideError::WildcardTable);
    }
    if table.is_empty() {
        return Err(OverrideError::MissingTableName);
    }
    Ok((table, cols))
}

fn string_list(key: &str, value: &Value) -> Result<Vec<String>, OverrideError> {
    let Value::Array(items) = value else {
        return Err(OverrideError::InvalidColumnType {
            key: key.to_string(),
            found: json_type(value),
        });
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) => {
                if !out.contains(s) {
                    out.push(s.clone());
                }
            },
            other => {
                return Err(OverrideError::InvalidColumnType {
                    key: key.to_string(),
                    found: json_type(other),
                })
            },
        }
    }
    Ok(out)
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Recommendation
// ============================================================================

/// Recommended columns for one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Group-by columns, seeds and overrides first, then by usage
    pub group_by_cols: Vec<String>,
    /// Measure columns from every source
    pub measure_cols: BTreeSet<String>,
}

/// Built-in seeds for recognised table schemas
pub fn seed_columns(table: &str) -> Option<GroupByOverride> {
    if table.starts_with(TRACING_TABLE_PREFIX) {
        return Some(GroupByOverride {
            group_by_cols: vec![
                "traceID".to_string(),
                "serviceName".to_string(),
                "operationName".to_string(),
            ],
            measure_cols: vec!["startTime".to_string()],
        });
    }
    None
}

/// Blend seeds, the table override and promoted aggregation usage
///
/// `promoted` holds the promoted aggregations associated with the table.
/// The timestamp key and `*` never appear among the group-by columns and at
/// most `max_cols` are returned.
pub fn recommend_columns(
    table: &str,
    override_cols: Option<&GroupByOverride>,
    promoted: &[TrackedQuery<QueryAggregators>],
    timestamp_key: &str,
    max_cols: usize,
) -> Recommendation {
    let excluded = |c: &str| c.is_empty() || c == WILDCARD || c == timestamp_key;

    let mut fixed: Vec<String> = Vec::new();
    let mut measure_cols = BTreeSet::new();
    for source in [seed_columns(table).as_ref(), override_cols].into_iter().flatten() {
        push_unique(&mut fixed, &source.group_by_cols);
        measure_cols.extend(source.measure_cols.iter().cloned());
    }
    fixed.retain(|c| !excluded(c.as_str()));

    let mut votes: HashMap<&str, u64> = HashMap::new();
    for tracked in promoted {
        for col in tracked.query.group_by_columns() {
            *votes.entry(col.as_str()).or_default() += tracked.info.total_usage as u64;
        }
        for m in tracked.query.group_by_measures() {
            measure_cols.insert(m.measure_col.clone());
        }
    }
    let mut ranked: Vec<(&str, u64)> = votes
        .into_iter()
        .filter(|&(c, _)| !excluded(c) && !fixed.iter().any(|f| f.as_str() == c))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut group_by_cols = fixed;
    group_by_cols.extend(ranked.into_iter().map(|(c, _)| c.to_string()));
    group_by_cols.truncate(max_cols);

    Recommendation {
        group_by_cols,
        measure_cols,
    }
}

/// Leading sort fields of promoted aggregations, weighted by usage
///
/// A sort field counts only when the aggregation actually reads it.
pub fn recommend_sort_columns(
    promoted: &[TrackedQuery<QueryAggregators>],
    column_usage: &dyn ColumnUsage,
    max_cols: usize,
) -> Vec<String> {
    let mut scores: HashMap<String, u64> = HashMap::new();
    for tracked in promoted {
        let Some(col) = tracked.query.leading_sort_column() else {
            continue;
        };
        let sets = column_usage.column_usage(None, Some(&tracked.query));
        if !sets.read.contains(col) {
            continue;
        }
        *scores.entry(col.to_string()).or_default() += tracked.info.total_usage as u64;
    }

    let mut ranked: Vec<(String, u64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(max_cols).map(|(c, _)| c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Pqid;
    use crate::query::aggs::{AggregateFunction, MeasureAggregator, SortColumn, SortRequest};
    use crate::query::columns::AstColumnUsage;
    use crate::tracker::registry::UsageInfo;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn tracked(aggs: QueryAggregators, usage: u32) -> TrackedQuery<QueryAggregators> {
        TrackedQuery {
            query: aggs,
            info: UsageInfo {
                all_tables: BTreeSet::new(),
                local_usage: usage,
                total_usage: usage,
                remote_usage: BTreeMap::new(),
                last_used_epoch: 0,
                pqid: Pqid::from_hash(usage as u64),
            },
            search_text: String::new(),
        }
    }

    fn agg(cols: &[&str], measures: &[&str]) -> QueryAggregators {
        QueryAggregators::group_by(
            cols,
            measures
                .iter()
                .map(|m| MeasureAggregator::new(*m, AggregateFunction::Count))
                .collect(),
        )
    }

    #[test]
    fn test_usage_voting_order() {
        let promoted = vec![tracked(agg(&["a", "b"], &["m1"]), 3), tracked(agg(&["b", "c"], &["m2"]), 2)];
        let rec = recommend_columns("t", None, &promoted, "timestamp", 10);
        assert_eq!(rec.group_by_cols, vec!["b", "a", "c"]);
        assert_eq!(rec.measure_cols.len(), 2);
    }

    #[test]
    fn test_tracing_seed_first() {
        let promoted = vec![tracked(agg(&["col1", "traceID"], &["col3"]), 1)];
        let rec = recommend_columns("jaeger-1", None, &promoted, "timestamp", 10);
        assert_eq!(
            rec.group_by_cols,
            vec!["traceID", "serviceName", "operationName", "col1"]
        );
        assert!(rec.measure_cols.contains("startTime"));
        assert!(rec.measure_cols.contains("col3"));
    }

    #[test]
    fn test_exclusions_and_cap() {
        let cols: Vec<String> = (0..20).map(|i| format!("c{:02}", i)).collect();
        let mut refs: Vec<&str> = cols.iter().map(String::as_str).collect();
        refs.push("timestamp");
        refs.push("*");
        let promoted = vec![tracked(agg(&refs, &[]), 1)];
        let over = GroupByOverride {
            group_by_cols: vec!["timestamp".to_string(), "x".to_string()],
            measure_cols: vec![],
        };

        let rec = recommend_columns("t", Some(&over), &promoted, "timestamp", 10);
        assert_eq!(rec.group_by_cols.len(), 10);
        assert_eq!(rec.group_by_cols[0], "x");
        assert!(!rec.group_by_cols.iter().any(|c| c == "timestamp" || c == "*"));
    }

    #[test]
    fn test_sort_recommendation() {
        let mut by_host = agg(&["host"], &["latency"]);
        by_host.sort = Some(SortRequest {
            columns: vec![SortColumn { name: "host".to_string(), ascending: true }],
        });
        let mut by_latency = agg(&["svc"], &["latency"]);
        by_latency.sort = Some(SortRequest {
            columns: vec![SortColumn { name: "latency".to_string(), ascending: false }],
        });
        let mut unread = agg(&["svc"], &[]);
        unread.sort = Some(SortRequest {
            columns: vec![SortColumn { name: "region".to_string(), ascending: true }],
        });

        let promoted = vec![tracked(by_host, 2), tracked(by_latency, 5), tracked(unread, 9)];
        let cols = recommend_sort_columns(&promoted, &AstColumnUsage, 10);
        assert_eq!(cols, vec!["latency", "host"]);
        assert_eq!(recommend_sort_columns(&promoted, &AstColumnUsage, 1), vec!["latency"]);
    }

    #[test]
    fn test_override_store_unions() {
        let store = OverrideStore::new();
        store
            .set("t", &GroupByOverride { group_by_cols: vec!["a".into()], measure_cols: vec![] })
            .unwrap();
        store
            .set("t", &GroupByOverride { group_by_cols: vec!["b".into(), "a".into()], measure_cols: vec!["m".into()] })
            .unwrap();
        let o = store.get("t").unwrap();
        assert_eq!(o.group_by_cols, vec!["a", "b"]);
        assert_eq!(o.measure_cols, vec!["m"]);
        assert_eq!(
            store.set("*", &GroupByOverride::default()),
            Err(OverrideError::WildcardTable)
        );
    }

    #[test]
    fn test_parse_override_body() {
        let (table, cols) = parse_override_body(&json!({
            "tableName": "web",
            "groupByColumns": ["host", "host", "path"],
            "measureColumns": ["latency"]
        }))
        .unwrap();
        assert_eq!(table, "web");
        assert_eq!(cols.group_by_cols, vec!["host", "path"]);

        assert_eq!(
            parse_override_body(&json!({"tableName": "*"})),
            Err(OverrideError::WildcardTable)
        );
        assert!(matches!(
            parse_override_body(&json!({"tableName": "web", "groupByColumns": ["a", 1]})),
            Err(OverrideError::InvalidColumnType { found: "number", .. })
        ));
        assert!(matches!(
            parse_override_body(&json!({"tableName": "web", "limit": 3})),
            Err(OverrideError::InvalidKey(_))
        ));
        assert_eq!(
            parse_override_body(&json!({"groupByColumns": []})),
            Err(OverrideError::MissingTableName)
        );
        assert!(matches!(
            parse_override_body(&json!([1, 2])),
            Err(OverrideError::InvalidBody(_))
        ));
    }
}
