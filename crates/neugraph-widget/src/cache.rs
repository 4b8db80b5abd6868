//! Per-node trace cache
//!
//! Every (node, direction, variable) triple known when a direction's file was
//! opened gets a placeholder. The first request reads the column from the
//! store; later requests are served from memory. Entries are never evicted;
//! a namespace is rebuilt only when the store replaces that direction's file.

use neugraph_storage::{Direction, NodeId, Result, Series, SeriesSource, VariableName};

use std::collections::HashMap;

#[derive(Debug, Clone)]
enum CacheSlot {
    Unloaded,
    Loaded(Series),
}

/// Entries of one direction, built from one store generation
#[derive(Debug, Default)]
struct Namespace {
    generation: u64,
    entries: HashMap<VariableName, HashMap<NodeId, CacheSlot>>,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Registered entries not read yet
    pub placeholders: usize,
    /// Entries holding a realized series
    pub loaded: usize,
    /// Requests served from memory
    pub hits: u64,
    /// Requests that read from the store
    pub loads: u64,
    /// Requests for keys that were never registered
    pub absent: u64,
}

/// Memoizes series read from a [`SeriesSource`]
#[derive(Debug, Default)]
pub struct TraceCache {
    namespaces: HashMap<Direction, Namespace>,
    hits: u64,
    loads: u64,
    absent: u64,
}

impl TraceCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the namespace for `direction` with fresh placeholders taken
    /// from the store's catalog. Old entries are dropped.
    pub fn register<S: SeriesSource + ?Sized>(&mut self, direction: Direction, store: &S) {
        let mut ns = Namespace {
            generation: store.generation(direction),
            entries: HashMap::new(),
        };
        let mut registered = 0usize;
        for entry in store.catalog(direction) {
            let nodes: HashMap<NodeId, CacheSlot> = entry
                .nodes
                .into_iter()
                .map(|node| (node, CacheSlot::Unloaded))
                .collect();
            registered += nodes.len();
            ns.entries.insert(entry.variable, nodes);
        }

        if let Some(old) = self.namespaces.insert(direction, ns) {
            let dropped = old
                .entries
                .values()
                .flat_map(|nodes| nodes.values())
                .filter(|slot| matches!(slot, CacheSlot::Loaded(_)))
                .count();
            if dropped > 0 {
                log::debug!("Dropped {} cached {} series", dropped, direction);
            }
        }
        log::debug!("Registered {} {} placeholders", registered, direction);
    }

    fn sync<S: SeriesSource + ?Sized>(&mut self, direction: Direction, store: &S) {
        let current = store.generation(direction);
        let stale = self
            .namespaces
            .get(&direction)
            .map_or(true, |ns| ns.generation != current);
        if stale {
            self.register(direction, store);
        }
    }

    /// Series for `node` in `direction.variable`.
    ///
    /// `Ok(None)` means no placeholder exists for the key: the node has no
    /// data for this variable. Store faults come back as `Err` and leave the
    /// placeholder unloaded.
    pub fn get_or_load<S: SeriesSource + ?Sized>(
        &mut self,
        node: &str,
        direction: Direction,
        variable: &str,
        store: &S,
    ) -> Result<Option<Series>> {
        self.sync(direction, store);

        let slot = self
            .namespaces
            .get_mut(&direction)
            .and_then(|ns| ns.entries.get_mut(variable))
            .and_then(|nodes| nodes.get_mut(node));
        let Some(slot) = slot else {
            self.absent += 1;
            return Ok(None);
        };

        match slot {
            CacheSlot::Loaded(series) => {
                self.hits += 1;
                Ok(Some(series.clone()))
            }
            CacheSlot::Unloaded => {
                let series = store.fetch(node, direction, variable)?;
                *slot = CacheSlot::Loaded(series.clone());
                self.loads += 1;
                Ok(Some(series))
            }
        }
    }

    /// True if a placeholder or series exists for the key
    pub fn contains(&self, node: &str, direction: Direction, variable: &str) -> bool {
        self.namespaces
            .get(&direction)
            .and_then(|ns| ns.entries.get(variable))
            .is_some_and(|nodes| nodes.contains_key(node))
    }

    /// True if the key holds a realized series
    pub fn is_loaded(&self, node: &str, direction: Direction, variable: &str) -> bool {
        self.namespaces
            .get(&direction)
            .and_then(|ns| ns.entries.get(variable))
            .and_then(|nodes| nodes.get(node))
            .is_some_and(|slot| matches!(slot, CacheSlot::Loaded(_)))
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits,
            loads: self.loads,
            absent: self.absent,
            ..Default::default()
        };
        for slot in self
            .namespaces
            .values()
            .flat_map(|ns| ns.entries.values())
            .flat_map(|nodes| nodes.values())
        {
            match slot {
                CacheSlot::Unloaded => stats.placeholders += 1,
                CacheSlot::Loaded(_) => stats.loaded += 1,
            }
        }
        stats
    }

    /// Drop every namespace
    pub fn clear(&mut self) {
        self.namespaces.clear();
    }
}
