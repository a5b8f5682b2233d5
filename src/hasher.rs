//! Canonical query hasher
//!
//! Turns a search AST or an aggregation pipeline into a [`Pqid`]: a
//! deterministic, order-insensitive fingerprint that survives restarts and
//! is compared against fingerprints persisted by other nodes.
//!
//! # Encoding
//!
//! Every structure is hashed with its own XXH64 (seed 0) over fixed-width
//! little-endian fields:
//!
//! - a one-byte structure tag opens every hash
//! - strings are length-prefixed
//! - child structures contribute their own 64-bit hash; an absent child
//!   contributes `0`
//! - commutative groups (conditions under AND/OR, match words, group-by
//!   columns, measures) are written as a count followed by the sorted
//!   child hashes, so reordering never changes the result
//! - leaf values carry a type tag, so `5` and `"5"` differ
//!
//! Only group-by, measure and time-bucket stages of a pipeline are hashed;
//! sort and limit stages never change the fingerprint.

use crate::query::aggs::{GroupByRequest, MeasureAggregator, QueryAggregators, TimeBucket};
use crate::query::ast::{
    DtypeValue, Expression, ExpressionInput, MatchFilter, QueryFilter, QueryInfo, SearchCondition,
    SearchExpression, SearchExpressionInput, SearchInfo, SearchNode, SearchQuery,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh64::Xxh64;

/// Persistent query id: decimal rendering of a 64-bit canonical hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pqid(String);

impl Pqid {
    /// Render a raw hash
    pub fn from_hash(hash: u64) -> Self {
        Pqid(hash.to_string())
    }

    /// Decimal string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pqid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Pqid {
    fn from(s: &str) -> Self {
        Pqid(s.to_string())
    }
}

impl From<String> for Pqid {
    fn from(s: String) -> Self {
        Pqid(s)
    }
}

/// Fingerprint of a search AST
pub fn hash_query(node: &SearchNode) -> Pqid {
    Pqid::from_hash(hash_node(Some(node)))
}

/// Fingerprint of an aggregation pipeline
pub fn hash_aggs(aggs: &QueryAggregators) -> Pqid {
    Pqid::from_hash(hash_pipeline(Some(aggs)))
}

// ============================================================================
// Field Writer
// ============================================================================

mod tag {
    pub const NODE: u8 = 0x01;
    pub const CONDITION: u8 = 0x02;
    pub const QUERY: u8 = 0x03;
    pub const EXPRESSION: u8 = 0x04;
    pub const MATCH: u8 = 0x05;
    pub const QUERY_INFO: u8 = 0x06;
    pub const SEARCH_INFO: u8 = 0x07;
    pub const VALUE: u8 = 0x08;
    pub const SEARCH_INPUT: u8 = 0x09;
    pub const RELATION: u8 = 0x0a;
    pub const RELATION_INPUT: u8 = 0x0b;

    pub const AGGS: u8 = 0x10;
    pub const GROUP_BY: u8 = 0x11;
    pub const MEASURES: u8 = 0x12;
    pub const MEASURE: u8 = 0x13;
    pub const HISTOGRAM: u8 = 0x14;
    pub const COLUMNS: u8 = 0x15;
}

/// Hash of an absent structure
const ABSENT: u64 = 0;

struct Fields(Xxh64);

impl Fields {
    fn new(tag: u8) -> Self {
        let mut h = Xxh64::new(0);
        h.update(&[tag]);
        Fields(h)
    }

    fn u8(&mut self, v: u8) -> &mut Self {
        self.0.update(&[v]);
        self
    }

    fn u64(&mut self, v: u64) -> &mut Self {
        self.0.update(&v.to_le_bytes());
        self
    }

    fn str(&mut self, s: &str) -> &mut Self {
        self.u64(s.len() as u64);
        self.0.update(s.as_bytes());
        self
    }

    fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.u64(b.len() as u64);
        self.0.update(b);
        self
    }

    /// Order-insensitive group of child hashes
    fn set(&mut self, mut hashes: Vec<u64>) -> &mut Self {
        hashes.sort_unstable();
        self.u64(hashes.len() as u64);
        for h in hashes {
            self.u64(h);
        }
        self
    }

    fn finish(&self) -> u64 {
        self.0.digest()
    }
}

// ============================================================================
// Search AST
// ============================================================================

fn hash_node(node: Option<&SearchNode>) -> u64 {
    let Some(n) = node else {
        return ABSENT;
    };
    Fields::new(tag::NODE)
        .u64(hash_condition(n.and_conditions.as_ref()))
        .u64(hash_condition(n.or_conditions.as_ref()))
        .u64(hash_condition(n.exclusion_conditions.as_ref()))
        .finish()
}

fn hash_condition(cond: Option<&SearchCondition>) -> u64 {
    let Some(c) = cond else {
        return ABSENT;
    };
    Fields::new(tag::CONDITION)
        .set(c.queries.iter().map(hash_search_query).collect())
        .set(c.nodes.iter().map(|n| hash_node(Some(n))).collect())
        .finish()
}

fn hash_search_query(q: &SearchQuery) -> u64 {
    let (expr, matcher) = match &q.filter {
        Some(QueryFilter::Expression(e)) => (hash_search_expression(e), ABSENT),
        Some(QueryFilter::Match(m)) => (ABSENT, hash_match_filter(m)),
        None => (ABSENT, ABSENT),
    };
    Fields::new(tag::QUERY)
        .u64(expr)
        .u64(matcher)
        .u8(q.search_type.code())
        .u64(hash_query_info(q.query_info.as_ref()))
        .finish()
}

fn hash_search_expression(e: &SearchExpression) -> u64 {
    Fields::new(tag::EXPRESSION)
        .u64(hash_search_input(e.left.as_ref()))
        .u8(e.op.code())
        .u64(hash_search_input(e.right.as_ref()))
        .u64(hash_search_info(e.search_info.as_ref()))
        .finish()
}

fn hash_search_input(input: Option<&SearchExpressionInput>) -> u64 {
    let Some(i) = input else {
        return ABSENT;
    };
    Fields::new(tag::SEARCH_INPUT)
        .str(&i.column_name)
        .u64(hash_relation(i.complex_relation.as_deref()))
        .u64(hash_value(i.column_value.as_ref()))
        .finish()
}

fn hash_relation(rel: Option<&Expression>) -> u64 {
    let Some(r) = rel else {
        return ABSENT;
    };
    Fields::new(tag::RELATION)
        .u64(hash_relation_input(r.left.as_ref()))
        .u8(r.op.code())
        .u64(hash_relation_input(r.right.as_ref()))
        .finish()
}

fn hash_relation_input(input: Option<&ExpressionInput>) -> u64 {
    let Some(i) = input else {
        return ABSENT;
    };
    Fields::new(tag::RELATION_INPUT)
        .u64(hash_value(i.column_value.as_ref()))
        .str(&i.column_name)
        .finish()
}

fn hash_match_filter(m: &MatchFilter) -> u64 {
    let words = m
        .words
        .iter()
        .map(|w| Fields::new(tag::VALUE).str(w).finish())
        .collect();
    Fields::new(tag::MATCH)
        .str(&m.column)
        .set(words)
        .u8(m.operator.code())
        .str(&m.phrase)
        .u8(m.match_type.code())
        .u8(m.negate as u8)
        .finish()
}

fn hash_query_info(info: Option<&QueryInfo>) -> u64 {
    let Some(i) = info else {
        return ABSENT;
    };
    Fields::new(tag::QUERY_INFO)
        .str(&i.column_name)
        .u64(hash_value(i.value.as_ref()))
        .finish()
}

fn hash_search_info(info: Option<&SearchInfo>) -> u64 {
    let Some(i) = info else {
        return ABSENT;
    };
    Fields::new(tag::SEARCH_INFO)
        .bytes(&i.col_encoding)
        .u64(hash_value(i.value.as_ref()))
        .finish()
}

fn hash_value(value: Option<&DtypeValue>) -> u64 {
    let Some(v) = value else {
        return ABSENT;
    };
    let mut f = Fields::new(tag::VALUE);
    f.u8(v.type_code());
    match v {
        DtypeValue::Bool(b) => f.u8(*b as u8),
        DtypeValue::Str(s) => f.str(s),
        DtypeValue::Unsigned(n) => f.u64(*n),
        DtypeValue::Signed(n) => f.u64(*n as u64),
        DtypeValue::Float(x) => f.u64(x.to_bits()),
    };
    f.finish()
}

// ============================================================================
// Aggregation Pipeline
// ============================================================================

fn hash_pipeline(aggs: Option<&QueryAggregators>) -> u64 {
    let Some(a) = aggs else {
        return ABSENT;
    };
    Fields::new(tag::AGGS)
        .u64(hash_group_by(a.group_by.as_ref()))
        .u64(hash_measures(&a.measure_operations))
        .u64(hash_histogram(a.time_histogram.as_ref()))
        .finish()
}

fn hash_group_by(group_by: Option<&GroupByRequest>) -> u64 {
    let Some(g) = group_by else {
        return ABSENT;
    };
    Fields::new(tag::GROUP_BY)
        .u64(hash_columns(&g.group_by_columns))
        .u64(hash_measures(&g.measure_operations))
        .finish()
}

fn hash_columns(cols: &[String]) -> u64 {
    if cols.is_empty() {
        return ABSENT;
    }
    let mut sorted: Vec<&str> = cols.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut f = Fields::new(tag::COLUMNS);
    f.u64(sorted.len() as u64);
    for c in sorted {
        f.str(c);
    }
    f.finish()
}

fn hash_measures(measures: &[MeasureAggregator]) -> u64 {
    if measures.is_empty() {
        return ABSENT;
    }
    let hashes = measures
        .iter()
        .map(|m| {
            Fields::new(tag::MEASURE)
                .str(&m.measure_col)
                .u8(m.measure_func.code())
                .finish()
        })
        .collect();
    Fields::new(tag::MEASURES).set(hashes).finish()
}

fn hash_histogram(bucket: Option<&TimeBucket>) -> u64 {
    let Some(b) = bucket else {
        return ABSENT;
    };
    Fields::new(tag::HISTOGRAM)
        .u64(b.interval_millis)
        .u64(b.start_time)
        .u64(b.end_time)
        .finish()
}
