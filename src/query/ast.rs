//! Search Abstract Syntax Tree (AST)
//!
//! The predicate tree produced by the external query-language parser and
//! consumed by the tracker. A [`SearchNode`] groups conditions under three
//! slots (AND, OR and exclusion); each [`SearchCondition`] holds leaf
//! queries and nested nodes.
//!
//! # Example
//!
//! ```rust
//! use pqs_tracker::query::ast::{FilterOperator, SearchNode, SearchQuery, DtypeValue};
//!
//! // os = "iOS"
//! let node = SearchNode::and_of(vec![SearchQuery::column_equals("os", DtypeValue::from("iOS"))]);
//! assert!(!node.is_match_all());
//! assert!(node.columns().contains("os"));
//! # let _ = FilterOperator::Equals;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Column and value name that means "anything"
pub const WILDCARD: &str = "*";

// ============================================================================
// Leaf Values
// ============================================================================

/// A typed literal as it appears in a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "value")]
pub enum DtypeValue {
    /// Boolean literal
    Bool(bool),
    /// String literal (may contain wildcards)
    Str(String),
    /// Unsigned integer literal
    Unsigned(u64),
    /// Signed integer literal
    Signed(i64),
    /// Floating point literal
    Float(f64),
}

impl DtypeValue {
    /// Stable type tag, part of the persisted hash format
    pub fn type_code(&self) -> u8 {
        match self {
            DtypeValue::Bool(_) => 1,
            DtypeValue::Str(_) => 2,
            DtypeValue::Unsigned(_) => 3,
            DtypeValue::Signed(_) => 4,
            DtypeValue::Float(_) => 5,
        }
    }

    /// True for the `*` string literal
    pub fn is_wildcard(&self) -> bool {
        matches!(self, DtypeValue::Str(s) if s == WILDCARD)
    }
}

impl From<&str> for DtypeValue {
    fn from(s: &str) -> Self {
        DtypeValue::Str(s.to_string())
    }
}

impl From<String> for DtypeValue {
    fn from(s: String) -> Self {
        DtypeValue::Str(s)
    }
}

impl From<i64> for DtypeValue {
    fn from(v: i64) -> Self {
        DtypeValue::Signed(v)
    }
}

impl From<u64> for DtypeValue {
    fn from(v: u64) -> Self {
        DtypeValue::Unsigned(v)
    }
}

impl From<f64> for DtypeValue {
    fn from(v: f64) -> Self {
        DtypeValue::Float(v)
    }
}

impl From<bool> for DtypeValue {
    fn from(v: bool) -> Self {
        DtypeValue::Bool(v)
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Comparison operator of a search expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    /// `=`
    Equals,
    /// `!=`
    NotEquals,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// Value matches a regular expression
    Regex,
    /// Column is absent
    IsNull,
    /// Column is present
    IsNotNull,
}

impl FilterOperator {
    /// Stable code, part of the persisted hash format
    pub fn code(&self) -> u8 {
        match self {
            FilterOperator::Equals => 0,
            FilterOperator::NotEquals => 1,
            FilterOperator::LessThan => 2,
            FilterOperator::LessThanOrEqual => 3,
            FilterOperator::GreaterThan => 4,
            FilterOperator::GreaterThanOrEqual => 5,
            FilterOperator::Regex => 6,
            FilterOperator::IsNull => 7,
            FilterOperator::IsNotNull => 8,
        }
    }
}

/// Arithmetic operator joining two expression inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOperator {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
}

impl ArithmeticOperator {
    /// Stable code, part of the persisted hash format
    pub fn code(&self) -> u8 {
        match self {
            ArithmeticOperator::Add => 0,
            ArithmeticOperator::Subtract => 1,
            ArithmeticOperator::Multiply => 2,
            ArithmeticOperator::Divide => 3,
            ArithmeticOperator::Modulo => 4,
        }
    }
}

/// How the words of a match filter combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    /// Every word must match
    And,
    /// Any word may match
    Or,
}

impl LogicalOperator {
    /// Stable code, part of the persisted hash format
    pub fn code(&self) -> u8 {
        match self {
            LogicalOperator::And => 0,
            LogicalOperator::Or => 1,
        }
    }
}

/// Free-text match flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    /// Individual words
    Words,
    /// Whole phrase
    Phrase,
    /// Key/value lookup inside an array column
    DictArray,
}

impl MatchType {
    /// Stable code, part of the persisted hash format
    pub fn code(&self) -> u8 {
        match self {
            MatchType::Words => 0,
            MatchType::Phrase => 1,
            MatchType::DictArray => 2,
        }
    }
}

/// Execution flavour chosen by the parser for a leaf query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchQueryType {
    /// Comparison on one column
    SimpleExpression,
    /// Regex on one column
    RegexExpression,
    /// Free-text match on one column
    MatchWords,
    /// Comparison against every column
    SimpleExpressionAllColumns,
    /// Regex against every column
    RegexExpressionAllColumns,
    /// Free-text match against every column
    MatchWordsAllColumns,
    /// Key/value lookup in an array column
    MatchDictArraySingleColumn,
}

impl SearchQueryType {
    /// Stable code, part of the persisted hash format
    pub fn code(&self) -> u8 {
        match self {
            SearchQueryType::SimpleExpression => 0,
            SearchQueryType::RegexExpression => 1,
            SearchQueryType::MatchWords => 2,
            SearchQueryType::SimpleExpressionAllColumns => 3,
            SearchQueryType::RegexExpressionAllColumns => 4,
            SearchQueryType::MatchWordsAllColumns => 5,
            SearchQueryType::MatchDictArraySingleColumn => 6,
        }
    }
}

/// What a search node needs from a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchNodeType {
    /// Only the time range matters: every record matches
    MatchAll,
    /// At least one non-timestamp column value must be inspected
    #[default]
    ColumnValue,
    /// Parser could not make sense of the query
    Invalid,
}

// ============================================================================
// Expressions
// ============================================================================

/// One side of an arithmetic relation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpressionInput {
    /// Literal operand, if any
    pub column_value: Option<DtypeValue>,
    /// Column operand, empty when the operand is a literal
    pub column_name: String,
}

/// Arithmetic relation between columns and literals, e.g. `a + b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    /// Left operand
    pub left: Option<ExpressionInput>,
    /// Operator
    pub op: ArithmeticOperator,
    /// Right operand
    pub right: Option<ExpressionInput>,
}

/// One side of a search expression
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchExpressionInput {
    /// Column to search
    pub column_name: String,
    /// Relation spanning several columns
    pub complex_relation: Option<Box<Expression>>,
    /// Literal to compare against: "0", "abc", "abcd*", 0.213
    pub column_value: Option<DtypeValue>,
}

impl SearchExpressionInput {
    /// A plain column reference
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            column_name: name.into(),
            ..Default::default()
        }
    }

    /// A literal value
    pub fn value(value: DtypeValue) -> Self {
        Self {
            column_value: Some(value),
            ..Default::default()
        }
    }
}

/// Encoding hints attached by the parser
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchInfo {
    /// Encoded form of the column
    pub col_encoding: Vec<u8>,
    /// Value used for raw checks
    pub value: Option<DtypeValue>,
}

/// A flattened comparison: `left <op> right`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchExpression {
    /// Always defined by the parser
    pub left: Option<SearchExpressionInput>,
    /// Comparison operator
    pub op: FilterOperator,
    /// May be absent depending on the operator
    pub right: Option<SearchExpressionInput>,
    /// Encoding hints
    pub search_info: Option<SearchInfo>,
}

impl SearchExpression {
    /// `left` is `*` and `right` is the `*` literal
    pub fn is_match_all(&self) -> bool {
        let left_all = self
            .left
            .as_ref()
            .map(|l| l.column_name == WILDCARD)
            .unwrap_or(false);
        let right_all = self
            .right
            .as_ref()
            .and_then(|r| r.column_value.as_ref())
            .map(DtypeValue::is_wildcard)
            .unwrap_or(false);
        left_all && right_all
    }
}

/// Free-text match against one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFilter {
    /// Column to search, `*` for all
    pub column: String,
    /// Words to search for
    pub words: Vec<String>,
    /// How words combine
    pub operator: LogicalOperator,
    /// Whole phrase for phrase queries
    pub phrase: String,
    /// Match flavour
    pub match_type: MatchType,
    /// Negated match
    #[serde(default)]
    pub negate: bool,
}

impl MatchFilter {
    /// `*` column and only `*` words
    pub fn is_match_all(&self) -> bool {
        self.column == WILDCARD
            && !self.words.is_empty()
            && self.words.iter().all(|w| w == WILDCARD)
    }
}

/// Column and value the engine uses for raw checks
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryInfo {
    /// Column checked
    pub column_name: String,
    /// Value checked; absent for match filters
    pub value: Option<DtypeValue>,
}

/// Either side of a leaf query; the parser never sets both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryFilter {
    /// Structured comparison
    Expression(SearchExpression),
    /// Free-text match
    Match(MatchFilter),
}

// ============================================================================
// Tree
// ============================================================================

/// A leaf query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Filter, absent only in malformed trees
    pub filter: Option<QueryFilter>,
    /// Execution flavour
    pub search_type: SearchQueryType,
    /// Raw-check info
    pub query_info: Option<QueryInfo>,
}

impl SearchQuery {
    /// `column = value`
    pub fn column_equals(column: &str, value: DtypeValue) -> Self {
        Self::compare(column, FilterOperator::Equals, value)
    }

    /// `column <op> value`
    pub fn compare(column: &str, op: FilterOperator, value: DtypeValue) -> Self {
        Self {
            filter: Some(QueryFilter::Expression(SearchExpression {
                left: Some(SearchExpressionInput::column(column)),
                op,
                right: Some(SearchExpressionInput::value(value)),
                search_info: None,
            })),
            search_type: SearchQueryType::SimpleExpression,
            query_info: None,
        }
    }

    /// Free-text words on a column
    pub fn match_words(column: &str, words: &[&str], operator: LogicalOperator) -> Self {
        Self {
            filter: Some(QueryFilter::Match(MatchFilter {
                column: column.to_string(),
                words: words.iter().map(|w| w.to_string()).collect(),
                operator,
                phrase: String::new(),
                match_type: MatchType::Words,
                negate: false,
            })),
            search_type: if column == WILDCARD {
                SearchQueryType::MatchWordsAllColumns
            } else {
                SearchQueryType::MatchWords
            },
            query_info: None,
        }
    }

    /// True when the leaf matches every record
    pub fn is_match_all(&self) -> bool {
        match &self.filter {
            Some(QueryFilter::Expression(e)) => e.is_match_all(),
            Some(QueryFilter::Match(m)) => m.is_match_all(),
            None => false,
        }
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match &self.filter {
            Some(QueryFilter::Expression(e)) => {
                for input in [&e.left, &e.right].into_iter().flatten() {
                    push_column(out, &input.column_name);
                    if let Some(rel) = &input.complex_relation {
                        for side in [&rel.left, &rel.right].into_iter().flatten() {
                            push_column(out, &side.column_name);
                        }
                    }
                }
            },
            Some(QueryFilter::Match(m)) => push_column(out, &m.column),
            None => {},
        }
    }
}

fn push_column(out: &mut BTreeSet<String>, name: &str) {
    if !name.is_empty() && name != WILDCARD {
        out.insert(name.to_string());
    }
}

/// Leaf queries and nested nodes combined under one logical slot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchCondition {
    /// Leaf queries
    pub queries: Vec<SearchQuery>,
    /// Nested nodes
    pub nodes: Vec<SearchNode>,
}

impl SearchCondition {
    fn is_empty(&self) -> bool {
        self.queries.is_empty() && self.nodes.is_empty()
    }
}

/// Root of a search predicate tree
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchNode {
    /// Conditions that must all hold
    pub and_conditions: Option<SearchCondition>,
    /// Conditions of which one must hold
    pub or_conditions: Option<SearchCondition>,
    /// Conditions that must not hold
    pub exclusion_conditions: Option<SearchCondition>,
    /// Classification set by the parser
    #[serde(default)]
    pub node_type: SearchNodeType,
}

impl SearchNode {
    /// AND of leaf queries
    pub fn and_of(queries: Vec<SearchQuery>) -> Self {
        let mut node = Self {
            and_conditions: Some(SearchCondition {
                queries,
                nodes: Vec::new(),
            }),
            ..Default::default()
        };
        node.node_type = node.classify();
        node
    }

    /// OR of leaf queries
    pub fn or_of(queries: Vec<SearchQuery>) -> Self {
        let mut node = Self {
            or_conditions: Some(SearchCondition {
                queries,
                nodes: Vec::new(),
            }),
            ..Default::default()
        };
        node.node_type = node.classify();
        node
    }

    /// The distinguished "match everything" query: `* = *`
    pub fn match_all() -> Self {
        Self::and_of(vec![SearchQuery::column_equals(WILDCARD, DtypeValue::from(WILDCARD))])
    }

    /// True for the distinguished "match everything" shape
    ///
    /// The tree decides, so a node decoded without `node_type` still counts.
    pub fn is_match_all(&self) -> bool {
        self.node_type == SearchNodeType::MatchAll || self.classify() == SearchNodeType::MatchAll
    }

    /// Derive the node type from the tree
    ///
    /// A node is match-all when it has no exclusions and every AND/OR leaf
    /// matches everything; nested nodes must be match-all too.
    pub fn classify(&self) -> SearchNodeType {
        if self.exclusion_conditions.as_ref().is_some_and(|c| !c.is_empty()) {
            return SearchNodeType::ColumnValue;
        }

        let mut saw_leaf = false;
        for cond in [&self.and_conditions, &self.or_conditions].into_iter().flatten() {
            for q in &cond.queries {
                saw_leaf = true;
                if !q.is_match_all() {
                    return SearchNodeType::ColumnValue;
                }
            }
            for n in &cond.nodes {
                saw_leaf = true;
                if n.classify() != SearchNodeType::MatchAll {
                    return SearchNodeType::ColumnValue;
                }
            }
        }

        if saw_leaf {
            SearchNodeType::MatchAll
        } else {
            SearchNodeType::Invalid
        }
    }

    /// Every column the tree reads, excluding `*`
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        for cond in [
            &self.and_conditions,
            &self.or_conditions,
            &self.exclusion_conditions,
        ]
        .into_iter()
        .flatten()
        {
            for q in &cond.queries {
                q.collect_columns(out);
            }
            for n in &cond.nodes {
                n.collect_columns(out);
            }
        }
    }
}
