//! Aggregation pipeline descriptor
//!
//! Produced by the external parser next to the search AST. Only the
//! group-by, measure and time-bucket stages decide whether two pipelines
//! share a cacheable shape; sort and limit stages are carried for the
//! recommendation engine.

use serde::{Deserialize, Serialize};

/// Measure function applied to a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Number of values
    Count,
    /// Sum of values
    Sum,
    /// Arithmetic mean
    Avg,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Range (max - min)
    Range,
    /// Distinct value count
    Cardinality,
    /// Distinct values
    Values,
}

impl AggregateFunction {
    /// Stable code, part of the persisted hash format
    pub fn code(&self) -> u8 {
        match self {
            AggregateFunction::Count => 0,
            AggregateFunction::Sum => 1,
            AggregateFunction::Avg => 2,
            AggregateFunction::Min => 3,
            AggregateFunction::Max => 4,
            AggregateFunction::Range => 5,
            AggregateFunction::Cardinality => 6,
            AggregateFunction::Values => 7,
        }
    }

    /// Lowercase name as written in queries
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Range => "range",
            AggregateFunction::Cardinality => "cardinality",
            AggregateFunction::Values => "values",
        }
    }
}

/// A single measure: `func(column)`, optionally over an evaluated expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureAggregator {
    /// Column being measured
    pub measure_col: String,
    /// Function applied
    pub measure_func: AggregateFunction,
    /// Expression computing the measured value (e.g. `eval(...)`)
    #[serde(default)]
    pub value_col_request: Option<String>,
}

impl MeasureAggregator {
    /// `func(column)`
    pub fn new(measure_col: impl Into<String>, measure_func: AggregateFunction) -> Self {
        Self {
            measure_col: measure_col.into(),
            measure_func,
            value_col_request: None,
        }
    }
}

/// Group-by stage
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupByRequest {
    /// Measures computed per bucket
    pub measure_operations: Vec<MeasureAggregator>,
    /// Columns forming the bucket key
    pub group_by_columns: Vec<String>,
    /// Output name
    #[serde(default)]
    pub agg_name: String,
    /// Bucket cap
    #[serde(default)]
    pub bucket_count: usize,
}

/// Time bucketing stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// Bucket width
    pub interval_millis: u64,
    /// Range start
    pub start_time: u64,
    /// Range end
    pub end_time: u64,
    /// Output name
    #[serde(default)]
    pub agg_name: String,
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortColumn {
    /// Column sorted on
    pub name: String,
    /// Direction
    pub ascending: bool,
}

/// Sort stage; the first column is the leading sort field
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortRequest {
    /// Sort keys in priority order
    pub columns: Vec<SortColumn>,
}

impl SortRequest {
    /// Leading sort field, if any
    pub fn leading(&self) -> Option<&str> {
        self.columns.first().map(|c| c.name.as_str())
    }
}

/// Aggregation pipeline of one query
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryAggregators {
    /// Group-by stage
    #[serde(default)]
    pub group_by: Option<GroupByRequest>,
    /// Measures computed over the whole result (stats without `by`)
    #[serde(default)]
    pub measure_operations: Vec<MeasureAggregator>,
    /// Time histogram stage
    #[serde(default)]
    pub time_histogram: Option<TimeBucket>,
    /// Sort stage
    #[serde(default)]
    pub sort: Option<SortRequest>,
    /// Stop once enough records were found
    #[serde(default)]
    pub early_exit: bool,
    /// Bucket limit
    #[serde(default)]
    pub bucket_limit: usize,
    /// Next chained pipeline stage
    #[serde(default)]
    pub next: Option<Box<QueryAggregators>>,
}

impl QueryAggregators {
    /// Pipeline grouping by `columns` and computing `measures`
    pub fn group_by(columns: &[&str], measures: Vec<MeasureAggregator>) -> Self {
        Self {
            group_by: Some(GroupByRequest {
                measure_operations: measures,
                group_by_columns: columns.iter().map(|c| c.to_string()).collect(),
                agg_name: String::new(),
                bucket_count: 0,
            }),
            ..Default::default()
        }
    }

    /// No time histogram and no group-by columns or measures
    pub fn is_aggs_empty(&self) -> bool {
        if self.time_histogram.is_some() {
            return false;
        }
        match &self.group_by {
            Some(g) => g.group_by_columns.is_empty() && g.measure_operations.is_empty(),
            None => true,
        }
    }

    /// Only evaluated-expression measures and nothing to bucket on
    ///
    /// Such pipelines compute values per record and never benefit from a
    /// pre-aggregated fast path.
    pub fn is_value_col_only(&self) -> bool {
        if self.time_histogram.is_some() {
            return false;
        }
        let Some(g) = &self.group_by else {
            return false;
        };
        g.group_by_columns.is_empty()
            && !g.measure_operations.is_empty()
            && g.measure_operations.iter().all(|m| m.value_col_request.is_some())
    }

    /// Group-by columns, empty when there is no group-by stage
    pub fn group_by_columns(&self) -> &[String] {
        self.group_by
            .as_ref()
            .map(|g| g.group_by_columns.as_slice())
            .unwrap_or(&[])
    }

    /// Group-by measures, empty when there is no group-by stage
    pub fn group_by_measures(&self) -> &[MeasureAggregator] {
        self.group_by
            .as_ref()
            .map(|g| g.measure_operations.as_slice())
            .unwrap_or(&[])
    }

    /// Leading sort field of this stage or the first chained stage that sorts
    pub fn leading_sort_column(&self) -> Option<&str> {
        let mut stage = Some(self);
        while let Some(s) = stage {
            if let Some(col) = s.sort.as_ref().and_then(SortRequest::leading) {
                return Some(col);
            }
            stage = s.next.as_deref();
        }
        None
    }
}
