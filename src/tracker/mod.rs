//! Persistent Query Surfacing tracker
//!
//! [`PqsTracker`] observes every executed search and aggregation, ranks the
//! distinct shapes by usage and tells the planner which ones are promoted.
//!
//! # Architecture
//!
//! ```text
//! record_usage ──▶ hasher ──▶ UsageRegistry<SearchNode>
//!                         └─▶ UsageRegistry<QueryAggregators>
//!                                       │
//!          FlushService ◀───────────────┤ snapshot
//!          StaleSweepService ◀──────────┘ remove_stale
//!
//! recommend_columns ──▶ top-N aggregations ──▶ seeds + overrides + votes
//! ```
//!
//! The two registries and the override store each carry their own lock;
//! no operation holds more than one of them at a time.
//!
//! # Example
//!
//! ```rust
//! use pqs_tracker::config::Config;
//! use pqs_tracker::query::{DtypeValue, SearchNode, SearchQuery};
//! use pqs_tracker::tracker::PqsTracker;
//!
//! let tracker = PqsTracker::from_config(&Config::default());
//! let tables = vec!["web".to_string()];
//! let node = SearchNode::and_of(vec![SearchQuery::column_equals("os", DtypeValue::from("iOS"))]);
//!
//! tracker.record_search(&tables, &node, "os=iOS");
//! assert!(tracker.is_promoted(&tables, &node));
//! ```

pub mod persist;
pub mod recommend;
pub mod registry;

use crate::catalog::TableExpander;
use crate::config::{Config, PersistenceConfig, TrackerConfig};
use crate::error::{Error, OverrideError, Result};
use crate::hasher::{hash_aggs, hash_query, Pqid};
use crate::metrics;
use crate::query::aggs::QueryAggregators;
use crate::query::ast::SearchNode;
use crate::query::columns::{AstColumnUsage, ColumnUsage};
use parking_lot::Mutex;
use persist::SnapshotKind;
use recommend::OverrideStore;
use registry::{RecordOutcome, TrackedQuery, UsageRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub use recommend::{GroupByOverride, Recommendation};
pub use registry::UsageInfo;

/// Tracked search node
pub type TrackedSearch = TrackedQuery<SearchNode>;
/// Tracked aggregation pipeline
pub type TrackedAggs = TrackedQuery<QueryAggregators>;

const SEARCH_KIND: &str = "search";
const AGGS_KIND: &str = "aggs";

// ============================================================================
// Admin Views
// ============================================================================

/// Counts reported by the summary endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Distinct search shapes tracked
    pub total_tracked_queries: usize,
    /// Distinct aggregation shapes tracked
    pub total_tracked_aggregations: usize,
    /// Promoted search shapes and their usage
    pub promoted_searches: BTreeMap<Pqid, u32>,
    /// Promoted aggregation shapes and their usage
    pub promoted_aggregations: BTreeMap<Pqid, u32>,
}

/// The query behind a detail view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailQuery {
    /// A search predicate
    SearchNode(SearchNode),
    /// An aggregation pipeline
    SearchAggs(QueryAggregators),
}

/// One tracked shape as shown to administrators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDetail {
    /// Canonical id
    pub pqid: Pqid,
    /// Last observation, seconds since the Unix epoch
    pub last_used_epoch: u64,
    /// Cluster-wide usage
    pub total_usage: u32,
    /// Tables the shape was seen against
    pub virtual_tables: BTreeSet<String>,
    /// The query itself
    #[serde(flatten)]
    pub query: DetailQuery,
}

impl QueryDetail {
    fn new(info: UsageInfo, query: DetailQuery) -> Self {
        Self {
            pqid: info.pqid,
            last_used_epoch: info.last_used_epoch,
            total_usage: info.total_usage,
            virtual_tables: info.all_tables,
            query,
        }
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Query usage tracker of one node
pub struct PqsTracker {
    config: TrackerConfig,
    data_dir: PathBuf,
    host_id: String,
    searches: UsageRegistry<SearchNode>,
    aggs: UsageRegistry<QueryAggregators>,
    overrides: OverrideStore,
    expander: Option<Arc<dyn TableExpander>>,
    column_usage: Arc<dyn ColumnUsage>,
    /// Serializes snapshot writes with clear
    flush_lock: Mutex<()>,
}

impl PqsTracker {
    /// Create an empty tracker
    pub fn new(config: TrackerConfig, persistence: &PersistenceConfig) -> Self {
        Self {
            searches: UsageRegistry::new(SEARCH_KIND, config.max_candidate_queries),
            aggs: UsageRegistry::new(AGGS_KIND, config.max_candidate_queries),
            config,
            data_dir: persistence.data_dir.clone(),
            host_id: persistence.host_id.clone(),
            overrides: OverrideStore::new(),
            expander: None,
            column_usage: Arc::new(AstColumnUsage),
            flush_lock: Mutex::new(()),
        }
    }

    /// Create an empty tracker from the full configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tracker.clone(), &config.persistence)
    }

    /// Resolve wildcard table names through `expander`
    pub fn with_table_expander(mut self, expander: Arc<dyn TableExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Use a custom column-usage utility for sort recommendations
    pub fn with_column_usage(mut self, column_usage: Arc<dyn ColumnUsage>) -> Self {
        self.column_usage = column_usage;
        self
    }

    /// Tracker limits
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Directory holding this node's snapshots
    pub fn node_dir(&self) -> PathBuf {
        self.data_dir
            .join(persist::NODES_DIR)
            .join(&self.host_id)
            .join(persist::PQUERIES_DIR)
    }

    fn snapshot_path(&self, kind: SnapshotKind) -> PathBuf {
        self.node_dir().join(kind.file_name())
    }

    fn window(&self) -> usize {
        self.config.max_queries_to_track
    }

    fn expander(&self) -> Option<&dyn TableExpander> {
        self.expander.as_deref()
    }

    // === Recording ===

    /// Record one executed query: its predicate and its pipeline
    pub fn record_usage(
        &self,
        tables: &[String],
        search: Option<&SearchNode>,
        aggs: Option<&QueryAggregators>,
        search_text: &str,
    ) {
        if tables.is_empty() {
            return;
        }
        if let Some(node) = search {
            self.record_search(tables, node, search_text);
        }
        if let Some(pipeline) = aggs {
            self.record_aggs(tables, pipeline, search_text);
        }
    }

    /// Record one search predicate
    ///
    /// Returns the pqid when the search was tracked. Match-all searches are
    /// never tracked.
    pub fn record_search(&self, tables: &[String], node: &SearchNode, search_text: &str) -> Option<Pqid> {
        if !self.config.enabled || tables.is_empty() {
            return None;
        }
        if node.is_match_all() {
            metrics::record_usage(SEARCH_KIND, "skipped");
            return None;
        }
        let pqid = hash_query(node);
        let outcome = self
            .searches
            .record(pqid.clone(), tables, || node.clone(), search_text, now_epoch());
        metrics::record_usage(SEARCH_KIND, outcome_label(&outcome));
        Some(pqid)
    }

    /// Record one aggregation pipeline
    ///
    /// Pipelines without group-by, measures or histogram, and pipelines that
    /// only compute per-record values, are never tracked.
    pub fn record_aggs(&self, tables: &[String], aggs: &QueryAggregators, search_text: &str) -> Option<Pqid> {
        if !self.config.enabled || tables.is_empty() {
            return None;
        }
        if aggs.is_aggs_empty() || aggs.is_value_col_only() {
            metrics::record_usage(AGGS_KIND, "skipped");
            return None;
        }
        let pqid = hash_aggs(aggs);
        let outcome = self
            .aggs
            .record(pqid.clone(), tables, || aggs.clone(), search_text, now_epoch());
        metrics::record_usage(AGGS_KIND, outcome_label(&outcome));
        Some(pqid)
    }

    // === Query-time Lookups ===

    /// Usage record of a search predicate
    pub fn get_usage_info(&self, _tables: &[String], node: &SearchNode) -> Option<TrackedSearch> {
        self.searches.get(&hash_query(node))
    }

    /// Usage record of an aggregation pipeline
    pub fn get_aggs_usage_info(&self, _tables: &[String], aggs: &QueryAggregators) -> Option<TrackedAggs> {
        self.aggs.get(&hash_aggs(aggs))
    }

    /// Search is tracked, ranks within the promotion window and was seen
    /// against one of `tables`
    pub fn is_promoted(&self, tables: &[String], node: &SearchNode) -> bool {
        self.config.enabled && self.searches.is_promoted(&hash_query(node), tables, self.window())
    }

    /// Aggregation counterpart of [`PqsTracker::is_promoted`]
    pub fn is_aggs_promoted(&self, tables: &[String], aggs: &QueryAggregators) -> bool {
        self.config.enabled && self.aggs.is_promoted(&hash_aggs(aggs), tables, self.window())
    }

    /// Promoted searches seen against `table`
    ///
    /// Wildcard table names stored on a record are expanded against the
    /// catalog and the concrete names are memoized, so this lookup may
    /// mutate the registry.
    pub fn top_n_for_table(&self, table: &str) -> HashMap<Pqid, SearchNode> {
        if !self.config.enabled {
            return HashMap::new();
        }
        self.searches
            .top_n_for_table(table, self.window(), self.expander())
            .into_iter()
            .map(|t| (t.info.pqid, t.query))
            .collect()
    }

    /// Promoted aggregations seen against `table`
    pub fn top_n_aggs_for_table(&self, table: &str) -> Vec<TrackedAggs> {
        if !self.config.enabled {
            return Vec::new();
        }
        self.aggs.top_n_for_table(table, self.window(), self.expander())
    }

    /// Expand wildcard table names on every record ahead of lookups
    ///
    /// Returns the number of records whose table set grew. A no-op without
    /// a table expander.
    pub fn resolve_wildcards(&self) -> usize {
        match self.expander() {
            Some(expander) => {
                self.searches.resolve_wildcards(expander) + self.aggs.resolve_wildcards(expander)
            },
            None => 0,
        }
    }

    /// Every column read by the promoted searches of `table`
    pub fn persistent_columns(&self, table: &str) -> BTreeSet<String> {
        self.top_n_for_table(table)
            .values()
            .flat_map(SearchNode::columns)
            .collect()
    }

    // === Recommendations ===

    /// Recommended group-by and measure columns for `table`
    pub fn recommend_columns(&self, table: &str) -> Recommendation {
        if !self.config.enabled {
            return Recommendation::default();
        }
        let override_cols = self.overrides.get(table);
        let promoted = self.top_n_aggs_for_table(table);
        recommend::recommend_columns(
            table,
            override_cols.as_ref(),
            &promoted,
            &self.config.timestamp_key,
            self.config.max_num_groupby_cols,
        )
    }

    /// Recommended sort columns for `table`
    pub fn recommend_sort_columns(&self, table: &str) -> Vec<String> {
        if !self.config.enabled {
            return Vec::new();
        }
        let promoted = self.top_n_aggs_for_table(table);
        recommend::recommend_sort_columns(&promoted, self.column_usage.as_ref(), self.config.max_sort_cols)
    }

    // === Administration ===

    /// Union columns into the override of `table`
    pub fn set_group_by_override(&self, table: &str, cols: &GroupByOverride) -> std::result::Result<(), OverrideError> {
        self.overrides.set(table, cols)?;
        tracing::info!(table = %table, group_by = ?cols.group_by_cols, measures = ?cols.measure_cols, "Updated group-by override");
        Ok(())
    }

    /// Apply an admin override body
    ///
    /// See [`recommend::parse_override_body`] for the accepted shape.
    pub fn set_group_by_override_json(&self, body: &serde_json::Value) -> std::result::Result<(), OverrideError> {
        let (table, cols) = recommend::parse_override_body(body)?;
        self.set_group_by_override(&table, &cols)
    }

    /// Override of `table`
    pub fn group_by_override(&self, table: &str) -> Option<GroupByOverride> {
        self.overrides.get(table)
    }

    /// Wipe every registry and override, then flush the empty state
    ///
    /// No concurrent flush can land a pre-clear snapshot after the empty one.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.flush_lock.lock();
        self.searches.clear();
        self.aggs.clear();
        self.overrides.clear();
        tracing::info!("Cleared all tracked queries");
        self.write_snapshots()
    }

    /// Tracked counts and promoted usage
    pub fn summary(&self) -> Summary {
        Summary {
            total_tracked_queries: self.searches.len(),
            total_tracked_aggregations: self.aggs.len(),
            promoted_searches: self.searches.top_n(self.window()).into_iter().collect(),
            promoted_aggregations: self.aggs.top_n(self.window()).into_iter().collect(),
        }
    }

    /// Detail of one tracked shape of either kind
    pub fn get_by_id(&self, pqid: &Pqid) -> Option<QueryDetail> {
        if let Some(t) = self.searches.get(pqid) {
            return Some(QueryDetail::new(t.info, DetailQuery::SearchNode(t.query)));
        }
        self.aggs
            .get(pqid)
            .map(|t| QueryDetail::new(t.info, DetailQuery::SearchAggs(t.query)))
    }

    /// [`PqsTracker::get_by_id`] as a `Result` for handlers
    pub fn require_by_id(&self, pqid: &Pqid) -> Result<QueryDetail> {
        self.get_by_id(pqid)
            .ok_or_else(|| Error::NotFound(pqid.to_string()))
    }

    /// Number of tracked search shapes
    pub fn tracked_searches(&self) -> usize {
        self.searches.len()
    }

    /// Number of tracked aggregation shapes
    pub fn tracked_aggregations(&self) -> usize {
        self.aggs.len()
    }

    // === Maintenance ===

    /// Drop shapes unseen for longer than the configured expiry
    pub fn remove_stale_entries(&self) -> usize {
        let now = now_epoch();
        let expiry = self.config.stale_expiry_secs;
        let removed = self.searches.remove_stale(now, expiry) + self.aggs.remove_stale(now, expiry);
        if removed > 0 {
            tracing::info!(
                removed,
                searches = self.searches.len(),
                aggs = self.aggs.len(),
                "Removed stale query shapes"
            );
        }
        removed
    }

    // === Persistence ===

    /// Write the three snapshots of this node
    ///
    /// State is copied under each lock and written after releasing it.
    /// Flushes are serialized with each other and with [`PqsTracker::clear`].
    pub fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock();
        self.write_snapshots()
    }

    /// Caller holds `flush_lock`
    fn write_snapshots(&self) -> Result<()> {
        let start = Instant::now();

        let searches = self.searches.snapshot();
        persist::write_json(&self.snapshot_path(SnapshotKind::Search), &searches, SnapshotKind::Search)?;

        let aggs = self.aggs.snapshot();
        persist::write_json(&self.snapshot_path(SnapshotKind::Aggs), &aggs, SnapshotKind::Aggs)?;

        let overrides = self.overrides.snapshot();
        persist::write_json(&self.snapshot_path(SnapshotKind::GroupBy), &overrides, SnapshotKind::GroupBy)?;

        metrics::record_flush(start.elapsed().as_secs_f64());
        tracing::debug!(
            searches = searches.len(),
            aggs = aggs.len(),
            overrides = overrides.len(),
            dir = %self.node_dir().display(),
            "Flushed query snapshots"
        );
        Ok(())
    }

    /// Replace in-memory state with this node's snapshots
    ///
    /// Missing files load as empty; unreadable files are logged and load
    /// as empty.
    pub fn load(&self) {
        let searches: HashMap<Pqid, TrackedSearch> =
            persist::load_or_default(&self.snapshot_path(SnapshotKind::Search), SnapshotKind::Search);
        let aggs: HashMap<Pqid, TrackedAggs> =
            persist::load_or_default(&self.snapshot_path(SnapshotKind::Aggs), SnapshotKind::Aggs);
        let overrides: HashMap<String, GroupByOverride> =
            persist::load_or_default(&self.snapshot_path(SnapshotKind::GroupBy), SnapshotKind::GroupBy);

        self.searches.replace_all(searches);
        self.aggs.replace_all(aggs);
        self.overrides.replace_all(overrides);

        tracing::info!(
            searches = self.searches.len(),
            aggs = self.aggs.len(),
            overrides = self.overrides.len(),
            "Loaded query snapshots"
        );
    }

    /// Merge other nodes' search snapshots
    ///
    /// Returns the number of files merged; unreadable files are logged and
    /// skipped.
    pub fn refresh_external_pq_info(&self, files: &[PathBuf]) -> usize {
        merge_files(&self.searches, files)
    }

    /// Merge other nodes' aggregation snapshots
    pub fn refresh_external_aggs_info(&self, files: &[PathBuf]) -> usize {
        merge_files(&self.aggs, files)
    }

    /// Snapshot files written by the other nodes sharing `data_dir`
    pub fn peer_snapshot_files(&self, kind: SnapshotKind) -> Vec<PathBuf> {
        persist::peer_snapshot_files(&self.data_dir, &self.host_id, kind)
    }

    /// Discover and merge every peer snapshot
    pub fn merge_peers(&self) -> usize {
        let searches = self.peer_snapshot_files(SnapshotKind::Search);
        let aggs = self.peer_snapshot_files(SnapshotKind::Aggs);
        self.refresh_external_pq_info(&searches) + self.refresh_external_aggs_info(&aggs)
    }
}

fn merge_files<Q>(registry: &UsageRegistry<Q>, files: &[PathBuf]) -> usize
where
    Q: Clone + serde::de::DeserializeOwned,
{
    let mut merged = 0;
    for file in files {
        match persist::read_json::<HashMap<Pqid, TrackedQuery<Q>>>(file) {
            Ok(Some(remote)) => {
                let node = persist::node_id_from_path(file);
                let touched = registry.merge_remote(&node, remote);
                tracing::debug!(kind = registry.kind(), node = %node, touched, "Merged peer snapshot");
                merged += 1;
            },
            Ok(None) => {
                tracing::debug!(path = %file.display(), "Peer snapshot vanished before merge");
            },
            Err(e) => {
                tracing::error!(kind = registry.kind(), error = %e, "Skipping peer snapshot");
                metrics::record_merge_failure(registry.kind());
            },
        }
    }
    merged
}

fn outcome_label(outcome: &RecordOutcome) -> &'static str {
    match outcome {
        RecordOutcome::Inserted { .. } => "inserted",
        RecordOutcome::Updated { .. } => "updated",
    }
}

/// Seconds since the Unix epoch
pub fn now_epoch() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::query::aggs::{AggregateFunction, MeasureAggregator, SortColumn, SortRequest};
    use crate::query::ast::{DtypeValue, SearchQuery};
    use tempfile::TempDir;

    fn tracker_in(dir: &TempDir) -> PqsTracker {
        let mut config = Config::default();
        config.persistence.data_dir = dir.path().to_path_buf();
        config.persistence.host_id = "node-a".to_string();
        PqsTracker::from_config(&config)
    }

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn ios_query() -> SearchNode {
        SearchNode::and_of(vec![SearchQuery::column_equals("os", DtypeValue::from("iOS"))])
    }

    fn agg(cols: &[&str], measures: &[(&str, AggregateFunction)]) -> QueryAggregators {
        QueryAggregators::group_by(
            cols,
            measures
                .iter()
                .map(|(c, f)| MeasureAggregator::new(*c, *f))
                .collect(),
        )
    }

    #[test]
    fn test_usage_and_promotion() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        let t = tables(&["test-1"]);
        let node = ios_query();

        for _ in 0..90 {
            tracker.record_usage(&t, Some(&node), None, "os=iOS");
        }
        let info = tracker.get_usage_info(&t, &node).unwrap();
        assert_eq!(info.info.total_usage, 90);
        assert!(tracker.is_promoted(&t, &node));

        let other = SearchNode::and_of(vec![SearchQuery::column_equals("os2", DtypeValue::from("iOS"))]);
        assert!(!tracker.is_promoted(&t, &other));
        assert!(tracker.get_usage_info(&t, &other).is_none());
    }

    #[test]
    fn test_empty_tables_record_nothing() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        tracker.record_usage(&[], Some(&ios_query()), None, "");
        assert_eq!(tracker.tracked_searches(), 0);
    }

    #[test]
    fn test_disabled_tracker_records_nothing() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.persistence.data_dir = dir.path().to_path_buf();
        config.tracker.enabled = false;
        let tracker = PqsTracker::from_config(&config);
        let t = tables(&["t"]);
        assert!(tracker.record_search(&t, &ios_query(), "").is_none());
        assert!(!tracker.is_promoted(&t, &ios_query()));
        assert!(tracker.recommend_columns("jaeger-1").group_by_cols.is_empty());
    }

    #[test]
    fn test_disabled_tracker_recommends_no_sort_columns() {
        let dir = TempDir::new().unwrap();
        let mut sorted = agg(&["service"], &[("latency", AggregateFunction::Max)]);
        sorted.sort = Some(SortRequest {
            columns: vec![SortColumn {
                name: "service".to_string(),
                ascending: true,
            }],
        });
        {
            let enabled = tracker_in(&dir);
            enabled.record_aggs(&tables(&["web"]), &sorted, "stats max(latency) by service | sort service");
            assert_eq!(enabled.recommend_sort_columns("web"), vec!["service".to_string()]);
            enabled.flush().unwrap();
        }

        let mut config = Config::default();
        config.persistence.data_dir = dir.path().to_path_buf();
        config.persistence.host_id = "node-a".to_string();
        config.tracker.enabled = false;
        let disabled = PqsTracker::from_config(&config);
        disabled.load();
        assert_eq!(disabled.tracked_aggregations(), 1);
        assert!(disabled.recommend_sort_columns("web").is_empty());
        assert!(disabled.recommend_columns("web").measure_cols.is_empty());
    }

    #[test]
    fn test_match_all_never_tracked() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        let t = tables(&["test-1"]);
        let all = SearchNode::match_all();
        for _ in 0..10 {
            tracker.record_search(&t, &all, "*");
        }
        assert!(tracker.get_usage_info(&t, &all).is_none());
        assert!(tracker.top_n_for_table("test-1").is_empty());
    }

    #[test]
    fn test_decoded_match_all_never_tracked() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        let t = tables(&["test-1"]);
        let decoded: SearchNode = serde_json::from_value(serde_json::json!({
            "and_conditions": {
                "queries": [serde_json::to_value(SearchQuery::column_equals("*", DtypeValue::from("*"))).unwrap()],
                "nodes": []
            }
        }))
        .unwrap();

        assert!(tracker.record_search(&t, &decoded, "*").is_none());
        assert!(tracker.get_usage_info(&t, &decoded).is_none());
        assert!(tracker.top_n_for_table("test-1").is_empty());
        assert_eq!(tracker.tracked_searches(), 0);
    }

    #[test]
    fn test_skipped_aggregations() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        let t = tables(&["t"]);
        assert!(tracker.record_aggs(&t, &QueryAggregators::default(), "").is_none());

        let mut m = MeasureAggregator::new("x", AggregateFunction::Sum);
        m.value_col_request = Some("x * 2".to_string());
        assert!(tracker
            .record_aggs(&t, &QueryAggregators::group_by(&[], vec![m]), "")
            .is_none());
        assert_eq!(tracker.tracked_aggregations(), 0);
    }

    #[test]
    fn test_recommendation_flow() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        let t1 = tables(&["test-1"]);
        let aggs1 = agg(
            &["col1", "col2"],
            &[("col3", AggregateFunction::Avg), ("col4", AggregateFunction::Count)],
        );
        tracker.record_usage(&t1, None, Some(&aggs1), "");

        let rec = tracker.recommend_columns("test-1");
        assert_eq!(rec.group_by_cols.len(), 2);
        assert_eq!(rec.measure_cols.len(), 2);
        assert!(tracker.recommend_columns("test-2").group_by_cols.is_empty());

        let aggs2 = agg(&["col3", "col2"], &[("col3", AggregateFunction::Cardinality)]);
        tracker.record_usage(&t1, None, Some(&aggs2), "");
        let rec = tracker.recommend_columns("test-1");
        assert_eq!(rec.group_by_cols.len(), 3);
        assert_eq!(rec.group_by_cols[0], "col2");
    }

    #[test]
    fn test_tracing_table_recommendation() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        let t = tables(&["jaeger-1"]);
        let aggs1 = agg(
            &["col1", "col2"],
            &[("col3", AggregateFunction::Avg), ("col4", AggregateFunction::Count)],
        );
        tracker.record_usage(&t, None, Some(&aggs1), "");

        let rec = tracker.recommend_columns("jaeger-1");
        assert_eq!(rec.group_by_cols.len(), 5);
        assert_eq!(rec.measure_cols.len(), 3);
        for col in ["col1", "col2", "traceID", "serviceName", "operationName"] {
            assert!(rec.group_by_cols.iter().any(|c| c == col));
        }

        let aggs2 = agg(&["col3", "col2"], &[("startTime", AggregateFunction::Max)]);
        tracker.record_usage(&t, None, Some(&aggs2), "");
        let rec = tracker.recommend_columns("jaeger-1");
        assert_eq!(rec.group_by_cols.len(), 6);
        assert_eq!(rec.group_by_cols[0], "traceID");
        assert!(rec.measure_cols.contains("col3"));
        assert!(rec.measure_cols.contains("col4"));
    }

    #[test]
    fn test_override_feeds_recommendation() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        tracker
            .set_group_by_override_json(&serde_json::json!({
                "tableName": "web",
                "groupByColumns": ["host", "timestamp"],
                "measureColumns": ["bytes"]
            }))
            .unwrap();
        let rec = tracker.recommend_columns("web");
        assert_eq!(rec.group_by_cols, vec!["host"]);
        assert!(rec.measure_cols.contains("bytes"));

        let err = tracker
            .set_group_by_override_json(&serde_json::json!({"tableName": "*"}))
            .unwrap_err();
        assert_eq!(err, OverrideError::WildcardTable);
        assert_eq!(tracker.group_by_override("web").unwrap().group_by_cols.len(), 2);
    }

    #[test]
    fn test_wildcard_tables_via_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(StaticCatalog::new());
        let tracker = tracker_in(&dir).with_table_expander(catalog.clone());
        tracker.record_search(&tables(&["logs-*"]), &ios_query(), "");

        assert!(tracker.top_n_for_table("logs-1").is_empty());
        catalog.add_table("logs-1");
        assert_eq!(tracker.top_n_for_table("logs-1").len(), 1);
        assert!(tracker.persistent_columns("logs-1").contains("os"));

        catalog.add_table("logs-2");
        assert_eq!(tracker.resolve_wildcards(), 1);
        let t2 = tables(&["logs-2"]);
        assert!(tracker.is_promoted(&t2, &ios_query()));
    }

    #[test]
    fn test_get_by_id_both_kinds() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        let t = tables(&["t"]);
        let sid = tracker.record_search(&t, &ios_query(), "").unwrap();
        let aid = tracker
            .record_aggs(&t, &agg(&["a"], &[("b", AggregateFunction::Max)]), "")
            .unwrap();

        assert!(matches!(
            tracker.get_by_id(&sid).unwrap().query,
            DetailQuery::SearchNode(_)
        ));
        let detail = tracker.get_by_id(&aid).unwrap();
        assert!(matches!(detail.query, DetailQuery::SearchAggs(_)));
        let json = serde_json::to_value(&detail).unwrap();
        assert!(json.get("search_aggs").is_some());
        assert!(json.get("virtual_tables").is_some());

        assert!(tracker.get_by_id(&Pqid::from("12345")).is_none());
        assert!(matches!(
            tracker.require_by_id(&Pqid::from("12345")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_clear_empties_summary_and_disk() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        let t = tables(&["t"]);
        tracker.record_search(&t, &ios_query(), "");
        tracker.record_aggs(&t, &agg(&["a"], &[]), "");
        tracker.flush().unwrap();

        tracker.clear().unwrap();
        assert_eq!(tracker.summary(), Summary::default());

        let reloaded = tracker_in(&dir);
        reloaded.load();
        assert_eq!(reloaded.summary(), Summary::default());
    }

    #[test]
    fn test_sort_recommendation_through_tracker() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        let mut aggs = agg(&["host"], &[("latency", AggregateFunction::Max)]);
        aggs.sort = Some(crate::query::aggs::SortRequest {
            columns: vec![crate::query::aggs::SortColumn {
                name: "latency".to_string(),
                ascending: false,
            }],
        });
        tracker.record_aggs(&tables(&["web"]), &aggs, "");
        assert_eq!(tracker.recommend_sort_columns("web"), vec!["latency"]);
        assert!(tracker.recommend_sort_columns("other").is_empty());
    }
}
