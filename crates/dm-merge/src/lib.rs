//! # Merge Table
//!
//! Combines per-source keyed collections (one collection per remote peer)
//! into one logical mapping, tracking conflicts and reference counts. All
//! three managers (connectivity, rpc, instances) reconcile peer-reported
//! state through this structure.
//!
//! The table is a derived, disposable view, not a source of truth: every
//! `update` replaces the per-source map wholesale and recomputes the
//! derived state from scratch. Peer and service counts are small (tens,
//! not millions), so the full rebuild is cheaper than being clever.
//!
//! ## Tie-break
//!
//! When several sources report different values for the same key, the
//! conflict is recorded and `get` resolves deterministically: the value
//! reported by the lowest source id wins.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use dm_types::DispatcherId;
use tracing::trace;

/// Keys that appeared or disappeared from the merged view in one update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeDelta {
    /// Keys present now that were absent before.
    pub added: Vec<String>,
    /// Keys absent now that were present before.
    pub removed: Vec<String>,
}

impl MergeDelta {
    /// True when nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Multi-source merge structure.
///
/// `V` is whatever a source reports per key; values only need equality
/// (for conflict detection) and cloning (for the simplified view).
#[derive(Debug, Clone)]
pub struct MergeTable<V> {
    /// Per-source maps, ordered so recomputation is deterministic.
    sources: BTreeMap<DispatcherId, HashMap<String, V>>,
    /// key → sources currently reporting it.
    key_sources: HashMap<String, BTreeSet<DispatcherId>>,
    /// key → number of sources currently reporting it.
    amount_of: HashMap<String, usize>,
    /// Keys whose reported values differ across sources.
    conflicts: HashSet<String>,
    /// Flattened view; lowest source id wins on conflict.
    simplified: HashMap<String, V>,
}

impl<V> Default for MergeTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MergeTable<V> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
            key_sources: HashMap::new(),
            amount_of: HashMap::new(),
            conflicts: HashSet::new(),
            simplified: HashMap::new(),
        }
    }

    /// Number of distinct keys in the merged view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.simplified.len()
    }

    /// True when no source reports anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.simplified.is_empty()
    }

    /// How many sources report `key`.
    #[must_use]
    pub fn amount_of(&self, key: &str) -> usize {
        self.amount_of.get(key).copied().unwrap_or(0)
    }

    /// The sources currently reporting `key`, in id order.
    #[must_use]
    pub fn sources_of(&self, key: &str) -> Vec<DispatcherId> {
        self.key_sources
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether sources disagree on the value of `key`.
    #[must_use]
    pub fn has_conflict(&self, key: &str) -> bool {
        self.conflicts.contains(key)
    }

    /// All keys in the merged view.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.simplified.keys()
    }

    /// The merged value for `key` (lowest source id wins on conflict).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.simplified.get(key)
    }

    /// The raw map one source last reported.
    #[must_use]
    pub fn source(&self, id: &DispatcherId) -> Option<&HashMap<String, V>> {
        self.sources.get(id)
    }

    /// Ids of all sources currently contributing.
    pub fn source_ids(&self) -> impl Iterator<Item = &DispatcherId> {
        self.sources.keys()
    }
}

impl<V: Clone + PartialEq> MergeTable<V> {
    /// Replace *all* per-source maps and rebuild the derived view.
    ///
    /// Returns which keys appeared or disappeared relative to the previous
    /// view.
    pub fn update(&mut self, sources: BTreeMap<DispatcherId, HashMap<String, V>>) -> MergeDelta {
        self.sources = sources;
        self.recompute()
    }

    /// Replace a single source's map and rebuild.
    pub fn set_source(&mut self, id: DispatcherId, map: HashMap<String, V>) -> MergeDelta {
        self.sources.insert(id, map);
        self.recompute()
    }

    /// Drop a source entirely and rebuild.
    pub fn remove_source(&mut self, id: &DispatcherId) -> MergeDelta {
        if self.sources.remove(id).is_none() {
            return MergeDelta::default();
        }
        self.recompute()
    }

    /// Remove one key from one source's map and rebuild.
    pub fn remove_key(&mut self, id: &DispatcherId, key: &str) -> MergeDelta {
        let Some(map) = self.sources.get_mut(id) else {
            return MergeDelta::default();
        };
        if map.remove(key).is_none() {
            return MergeDelta::default();
        }
        self.recompute()
    }

    /// Release all derived state. Idempotent.
    pub fn dispose(&mut self) {
        self.sources.clear();
        self.key_sources.clear();
        self.amount_of.clear();
        self.conflicts.clear();
        self.simplified.clear();
    }

    fn recompute(&mut self) -> MergeDelta {
        let previous: HashSet<String> = self.simplified.keys().cloned().collect();

        self.key_sources.clear();
        self.amount_of.clear();
        self.conflicts.clear();
        self.simplified.clear();

        // Sources iterate in id order, so the first writer of a key is the
        // lowest source id: that is the documented tie-break.
        for (source_id, map) in &self.sources {
            for (key, value) in map {
                self.key_sources
                    .entry(key.clone())
                    .or_default()
                    .insert(source_id.clone());
                *self.amount_of.entry(key.clone()).or_insert(0) += 1;

                match self.simplified.get(key) {
                    None => {
                        self.simplified.insert(key.clone(), value.clone());
                    }
                    Some(existing) if existing != value => {
                        self.conflicts.insert(key.clone());
                    }
                    Some(_) => {}
                }
            }
        }

        let current: HashSet<String> = self.simplified.keys().cloned().collect();
        let mut added: Vec<String> = current.difference(&previous).cloned().collect();
        let mut removed: Vec<String> = previous.difference(&current).cloned().collect();
        added.sort();
        removed.sort();

        let delta = MergeDelta { added, removed };
        if !delta.is_empty() {
            trace!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                keys = self.simplified.len(),
                "Merge table rebuilt"
            );
        }
        delta
    }
}
