//! Repository-scoped dagnode cache.
//!
//! Dagnodes are immutable once linked, so a cached node never goes stale.
//! The cache is bounded and evicts the oldest insertions first; it lives as
//! long as the [`crate::Repo`] that owns it.

use crate::dag::{ContentId, DagNum, Dagnode};
use crate::error::{DagError, Result};
use crate::storage::DagnodeFetch;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::trace;

type Key = (DagNum, ContentId);

#[derive(Debug, Default)]
struct CacheState {
    nodes: HashMap<Key, Dagnode>,
    order: VecDeque<Key>,
    hits: u64,
    misses: u64,
}

/// Bounded cache of linked dagnodes.
#[derive(Debug)]
pub struct DagnodeCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Nodes currently cached.
    pub len: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that went to the store.
    pub misses: u64,
}

impl DagnodeCache {
    /// Creates an empty cache holding at most `capacity` nodes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| DagError::storage("Dagnode cache lock poisoned"))
    }

    /// Returns a cached node.
    pub fn get(&self, dag_num: DagNum, id: &ContentId) -> Option<Dagnode> {
        let mut state = self.lock().ok()?;
        let found = state.nodes.get(&(dag_num, *id)).cloned();
        match found {
            Some(_) => state.hits += 1,
            None => state.misses += 1,
        }
        found
    }

    /// Caches a node, evicting the oldest entry when full.
    pub fn insert(&self, dag_num: DagNum, node: Dagnode) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        let key = (dag_num, *node.id());
        if state.nodes.contains_key(&key) {
            return;
        }
        while state.nodes.len() >= self.capacity {
            match state.order.pop_front() {
                Some(old) => {
                    state.nodes.remove(&old);
                }
                None => break,
            }
        }
        state.order.push_back(key);
        state.nodes.insert(key, node);
    }

    /// Returns the cached node, or fetches and caches it.
    pub fn get_or_fetch<F>(&self, fetch: &F, dag_num: DagNum, id: &ContentId) -> Result<Dagnode>
    where
        F: DagnodeFetch + ?Sized,
    {
        if let Some(node) = self.get(dag_num, id) {
            return Ok(node);
        }
        trace!(dag = %dag_num, node = %id.short(), "dagnode_cache: miss");
        let node = fetch.fetch_node(dag_num, id)?;
        self.insert(dag_num, node.clone());
        Ok(node)
    }

    /// Drops every cached node.
    pub fn clear(&self) {
        if let Ok(mut state) = self.lock() {
            state.nodes.clear();
            state.order.clear();
        }
    }

    /// Returns current counters.
    pub fn stats(&self) -> CacheStats {
        self.lock()
            .map(|s| CacheStats {
                len: s.nodes.len(),
                hits: s.hits,
                misses: s.misses,
            })
            .unwrap_or_default()
    }

    /// Maximum number of cached nodes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
