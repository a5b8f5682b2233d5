//! Bounded usage registry
//!
//! One registry tracks one kind of query shape (search nodes or
//! aggregation pipelines). It owns a map `Pqid -> TrackedQuery` and an
//! ordered usage index; both live behind one lock and every mutation
//! updates them together, so the index always holds exactly the map's keys
//! with their current `total_usage`.
//!
//! # Index
//!
//! The index is a `BTreeSet<(Reverse<total_usage>, Pqid)>`: iteration order
//! is usage descending, ties broken by pqid ascending so ranks are
//! deterministic.
//!
//! | Operation            | Cost           |
//! |----------------------|----------------|
//! | record (insert/bump) | O(log n)       |
//! | capacity eviction    | O(log n)       |
//! | top-N / rank check   | O(window)      |
//! | stale sweep, load    | O(n log n)     |

use crate::catalog::{is_pattern, TableExpander};
use crate::hasher::Pqid;
use crate::metrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ============================================================================
// Records
// ============================================================================

/// Usage counters of one tracked shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    /// Every table name (or pattern) the shape was seen against
    pub all_tables: BTreeSet<String>,
    /// Observations made by this node
    pub local_usage: u32,
    /// Cluster-wide observations: local plus every peer's latest report
    pub total_usage: u32,
    /// Latest `local_usage` reported by each peer node
    #[serde(default)]
    pub remote_usage: BTreeMap<String, u32>,
    /// Seconds since the Unix epoch of the last observation
    pub last_used_epoch: u64,
    /// Canonical id
    pub pqid: Pqid,
}

impl UsageInfo {
    fn recompute_total(&mut self) {
        let remote: u64 = self.remote_usage.values().map(|v| *v as u64).sum();
        self.total_usage = (self.local_usage as u64 + remote).min(u32::MAX as u64) as u32;
    }

    /// True when the shape was seen against any of `tables`
    pub fn matches_any(&self, tables: &[String]) -> bool {
        tables.iter().any(|t| self.all_tables.contains(t))
    }
}

/// A tracked query shape with its usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedQuery<Q> {
    /// The query as first observed
    pub query: Q,
    /// Usage counters
    #[serde(flatten)]
    pub info: UsageInfo,
    /// Raw query text as first observed
    #[serde(default)]
    pub search_text: String,
}

/// Result of one recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First observation of this shape
    Inserted {
        /// Minimum-usage shape evicted to make room
        evicted: Option<Pqid>,
    },
    /// Repeat observation
    Updated {
        /// Cluster-wide usage after the update
        total_usage: u32,
    },
}

// ============================================================================
// Registry
// ============================================================================

struct State<Q> {
    records: HashMap<Pqid, TrackedQuery<Q>>,
    index: BTreeSet<(Reverse<u32>, Pqid)>,
}

impl<Q> State<Q> {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            index: BTreeSet::new(),
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .records
            .iter()
            .map(|(id, r)| (Reverse(r.info.total_usage), id.clone()))
            .collect();
    }

    /// Drop the minimum-usage record
    fn evict_min(&mut self) -> Option<Pqid> {
        let (_, id) = self.index.pop_last()?;
        self.records.remove(&id);
        Some(id)
    }

    fn in_window(&self, pqid: &Pqid, window: usize) -> bool {
        self.index.iter().take(window).any(|(_, id)| id == pqid)
    }
}

/// Usage-ranked registry of one query kind
pub struct UsageRegistry<Q> {
    kind: &'static str,
    capacity: usize,
    state: RwLock<State<Q>>,
}

impl<Q: Clone> UsageRegistry<Q> {
    /// Create a registry holding at most `capacity` shapes
    ///
    /// `kind` labels logs and metrics.
    pub fn new(kind: &'static str, capacity: usize) -> Self {
        Self {
            kind,
            capacity: capacity.max(1),
            state: RwLock::new(State::new()),
        }
    }

    /// Label of this registry
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Record one observation of `pqid` against `tables`
    ///
    /// `make_query` is only called for a first observation.
    pub fn record<F>(
        &self,
        pqid: Pqid,
        tables: &[String],
        make_query: F,
        search_text: &str,
        now: u64,
    ) -> RecordOutcome
    where
        F: FnOnce() -> Q,
    {
        let mut state = self.state.write();

        if let Some(tracked) = state.records.get_mut(&pqid) {
            let old_key = (Reverse(tracked.info.total_usage), pqid.clone());
            tracked.info.local_usage = tracked.info.local_usage.saturating_add(1);
            tracked.info.recompute_total();
            tracked.info.last_used_epoch = now;
            tracked.info.all_tables.extend(tables.iter().cloned());
            let total_usage = tracked.info.total_usage;

            state.index.remove(&old_key);
            state.index.insert((Reverse(total_usage), pqid));
            return RecordOutcome::Updated { total_usage };
        }

        let evicted = if state.records.len() >= self.capacity {
            state.evict_min()
        } else {
            None
        };
        if let Some(id) = &evicted {
            tracing::debug!(kind = self.kind, pqid = %id, "Evicted least used query to make room");
            metrics::record_evictions(self.kind, "capacity", 1);
        }

        let tracked = TrackedQuery {
            query: make_query(),
            info: UsageInfo {
                all_tables: tables.iter().cloned().collect(),
                local_usage: 1,
                total_usage: 1,
                remote_usage: BTreeMap::new(),
                last_used_epoch: now,
                pqid: pqid.clone(),
            },
            search_text: search_text.to_string(),
        };
        state.index.insert((Reverse(1), pqid.clone()));
        state.records.insert(pqid.clone(), tracked);
        metrics::update_tracked(self.kind, state.records.len());

        tracing::info!(kind = self.kind, pqid = %pqid, tables = ?tables, "Tracking new query shape");
        RecordOutcome::Inserted { evicted }
    }

    /// Copy of the record for `pqid`
    pub fn get(&self, pqid: &Pqid) -> Option<TrackedQuery<Q>> {
        self.state.read().records.get(pqid).cloned()
    }

    /// 1-based usage rank of `pqid`
    pub fn rank(&self, pqid: &Pqid) -> Option<usize> {
        let state = self.state.read();
        if !state.records.contains_key(pqid) {
            return None;
        }
        state
            .index
            .iter()
            .position(|(_, id)| id == pqid)
            .map(|p| p + 1)
    }

    /// Record exists, ranks within `window` and was seen against one of `tables`
    pub fn is_promoted(&self, pqid: &Pqid, tables: &[String], window: usize) -> bool {
        let state = self.state.read();
        match state.records.get(pqid) {
            Some(tracked) => tracked.info.matches_any(tables) && state.in_window(pqid, window),
            None => false,
        }
    }

    /// `(pqid, total_usage)` of the first `window` ranks
    pub fn top_n(&self, window: usize) -> Vec<(Pqid, u32)> {
        self.state
            .read()
            .index
            .iter()
            .take(window)
            .map(|(Reverse(usage), id)| (id.clone(), *usage))
            .collect()
    }

    /// Promoted records seen against `table`
    ///
    /// Records whose table set holds patterns are expanded through
    /// `expander`; when a pattern now covers `table`, the concrete names are
    /// memoized into `all_tables`. This lookup therefore takes the write
    /// lock and may mutate the registry.
    pub fn top_n_for_table(
        &self,
        table: &str,
        window: usize,
        expander: Option<&dyn TableExpander>,
    ) -> Vec<TrackedQuery<Q>> {
        let mut state = self.state.write();
        let State { records, index } = &mut *state;

        let mut out = Vec::new();
        for (_, id) in index.iter().take(window) {
            let Some(tracked) = records.get_mut(id) else {
                continue;
            };
            if tracked.info.all_tables.contains(table) {
                out.push(tracked.clone());
                continue;
            }
            let Some(expander) = expander else {
                continue;
            };
            let expanded = expand_patterns(&tracked.info.all_tables, expander);
            if expanded.contains(table) {
                tracing::debug!(kind = self.kind, pqid = %id, table = %table, "Memoized wildcard tables");
                tracked.info.all_tables.extend(expanded);
                out.push(tracked.clone());
            }
        }
        out
    }

    /// Expand every stored pattern and memoize the concrete names
    ///
    /// Returns the number of records whose table set grew.
    pub fn resolve_wildcards(&self, expander: &dyn TableExpander) -> usize {
        let mut state = self.state.write();
        let mut grown = 0;
        for tracked in state.records.values_mut() {
            let expanded = expand_patterns(&tracked.info.all_tables, expander);
            let before = tracked.info.all_tables.len();
            tracked.info.all_tables.extend(expanded);
            if tracked.info.all_tables.len() > before {
                grown += 1;
            }
        }
        grown
    }

    /// Drop records last used more than `expiry_secs` before `now`
    pub fn remove_stale(&self, now: u64, expiry_secs: u64) -> usize {
        let mut state = self.state.write();
        let before = state.records.len();
        state
            .records
            .retain(|_, r| now.saturating_sub(r.info.last_used_epoch) <= expiry_secs);
        let removed = before - state.records.len();
        if removed > 0 {
            state.rebuild_index();
            metrics::record_evictions(self.kind, "stale", removed);
            metrics::update_tracked(self.kind, state.records.len());
        }
        removed
    }

    /// Remove every record
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.records.clear();
        state.index.clear();
        metrics::update_tracked(self.kind, 0);
    }

    /// Copy of every record, for persistence
    pub fn snapshot(&self) -> HashMap<Pqid, TrackedQuery<Q>> {
        self.state.read().records.clone()
    }

    /// Replace the contents with loaded records and rebuild the index
    ///
    /// Keys are taken from the map; the least used records beyond capacity
    /// are dropped.
    pub fn replace_all(&self, records: HashMap<Pqid, TrackedQuery<Q>>) {
        let mut state = self.state.write();
        state.records = records
            .into_iter()
            .map(|(id, mut r)| {
                r.info.pqid = id.clone();
                (id, r)
            })
            .collect();
        state.rebuild_index();
        while state.records.len() > self.capacity {
            state.evict_min();
        }
        metrics::update_tracked(self.kind, state.records.len());
    }

    /// Fold one peer's snapshot into this registry
    ///
    /// For each peer record the peer's `local_usage` replaces any earlier
    /// report from the same `node`, so merging the same snapshot twice is a
    /// no-op and a newer snapshot supersedes an older one. Unknown shapes
    /// are adopted with no local usage. Returns the number of records
    /// touched.
    pub fn merge_remote(&self, node: &str, remote: HashMap<Pqid, TrackedQuery<Q>>) -> usize {
        let mut state = self.state.write();
        let mut touched = 0;

        for (id, peer) in remote {
            let old_key = state
                .records
                .get(&id)
                .map(|r| (Reverse(r.info.total_usage), id.clone()));

            let new_total = match state.records.get_mut(&id) {
                Some(local) => {
                    local
                        .info
                        .remote_usage
                        .insert(node.to_string(), peer.info.local_usage);
                    local.info.recompute_total();
                    local.info.all_tables.extend(peer.info.all_tables);
                    local.info.last_used_epoch =
                        local.info.last_used_epoch.max(peer.info.last_used_epoch);
                    local.info.total_usage
                },
                None => {
                    let mut info = peer.info;
                    info.pqid = id.clone();
                    info.remote_usage = BTreeMap::from([(node.to_string(), info.local_usage)]);
                    info.local_usage = 0;
                    info.recompute_total();
                    let total = info.total_usage;
                    state.records.insert(
                        id.clone(),
                        TrackedQuery {
                            query: peer.query,
                            info,
                            search_text: peer.search_text,
                        },
                    );
                    total
                },
            };

            if let Some(key) = old_key {
                state.index.remove(&key);
            }
            state.index.insert((Reverse(new_total), id));
            touched += 1;
        }

        let mut evicted = 0;
        while state.records.len() > self.capacity {
            state.evict_min();
            evicted += 1;
        }
        metrics::record_evictions(self.kind, "capacity", evicted);
        metrics::update_tracked(self.kind, state.records.len());
        touched
    }

    /// Number of tracked shapes
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// True when nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    /// Maximum number of tracked shapes
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn expand_patterns(tables: &BTreeSet<String>, expander: &dyn TableExpander) -> BTreeSet<String> {
    tables
        .iter()
        .filter(|t| is_pattern(t))
        .flat_map(|t| expander.expand(t))
        .collect()
}
