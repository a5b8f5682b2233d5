//! Query shapes observed by the tracker
//!
//! The tracker never parses or executes queries. It receives the predicate
//! tree and the aggregation pipeline from the external parser and only
//! inspects their structure:
//!
//! ```text
//! query text ──parser──▶ SearchNode + QueryAggregators
//!                                │
//!                                ▼
//!                   hasher ──▶ Pqid ──▶ registry
//! ```

pub mod aggs;
pub mod ast;
pub mod columns;

pub use aggs::{
    AggregateFunction, GroupByRequest, MeasureAggregator, QueryAggregators, SortColumn,
    SortRequest, TimeBucket,
};
pub use ast::{
    DtypeValue, FilterOperator, LogicalOperator, MatchFilter, SearchCondition, SearchExpression,
    SearchNode, SearchNodeType, SearchQuery, WILDCARD,
};
pub use columns::{AstColumnUsage, ColumnSets, ColumnUsage};
