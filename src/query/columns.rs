//! Column usage extraction
//!
//! Given a search AST and an aggregation pipeline, report which columns a
//! query reads and which it only filters on. The sort recommendation uses
//! the read set to discard sort fields that the aggregation never touches.

use super::aggs::QueryAggregators;
use super::ast::{SearchNode, WILDCARD};
use std::collections::BTreeSet;

/// Columns touched by one query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSets {
    /// Columns only used in the search predicate
    pub filter_only: BTreeSet<String>,
    /// Columns the pipeline reads to produce its output
    pub read: BTreeSet<String>,
}

/// Column-usage utility
pub trait ColumnUsage: Send + Sync {
    /// Split the columns of a query into filter-only and read sets
    fn column_usage(&self, search: Option<&SearchNode>, aggs: Option<&QueryAggregators>) -> ColumnSets;
}

/// Default implementation walking the AST and the pipeline stages
#[derive(Debug, Clone, Copy, Default)]
pub struct AstColumnUsage;

impl ColumnUsage for AstColumnUsage {
    fn column_usage(&self, search: Option<&SearchNode>, aggs: Option<&QueryAggregators>) -> ColumnSets {
        let mut read = BTreeSet::new();

        let mut stage = aggs;
        while let Some(s) = stage {
            for col in s.group_by_columns() {
                add(&mut read, col);
            }
            for m in s.group_by_measures().iter().chain(s.measure_operations.iter()) {
                add(&mut read, &m.measure_col);
            }
            stage = s.next.as_deref();
        }

        let filter_only = search
            .map(SearchNode::columns)
            .unwrap_or_default()
            .into_iter()
            .filter(|c| !read.contains(c))
            .collect();

        ColumnSets { filter_only, read }
    }
}

fn add(set: &mut BTreeSet<String>, col: &str) {
    if !col.is_empty() && col != WILDCARD {
        set.insert(col.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::aggs::{AggregateFunction, MeasureAggregator};
    use crate::query::ast::SearchQuery;

    #[test]
    fn test_read_and_filter_sets() {
        let search = SearchNode::and_of(vec![
            SearchQuery::column_equals("region", "eu".into()),
            SearchQuery::column_equals("host", "a".into()),
        ]);
        let aggs = QueryAggregators::group_by(
            &["host"],
            vec![MeasureAggregator::new("latency", AggregateFunction::Max)],
        );

        let sets = AstColumnUsage.column_usage(Some(&search), Some(&aggs));
        assert!(sets.read.contains("host"));
        assert!(sets.read.contains("latency"));
        assert!(sets.filter_only.contains("region"));
        assert!(!sets.filter_only.contains("host"));
    }

    #[test]
    fn test_wildcard_measure_not_read() {
        let aggs = QueryAggregators::group_by(
            &["svc"],
            vec![MeasureAggregator::new("*", AggregateFunction::Count)],
        );
        let sets = AstColumnUsage.column_usage(None, Some(&aggs));
        assert_eq!(sets.read.len(), 1);
    }
}
