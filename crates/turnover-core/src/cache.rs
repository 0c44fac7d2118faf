use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::task::Task;

/// Tasks fetched per `YYYY-MM-DD` key. A populated key only changes through
/// [`TaskCache::replace`] or [`TaskCache::clear`].
#[derive(Debug, Clone, Default)]
pub struct TaskCache {
    entries: BTreeMap<String, Arc<Vec<Task>>>,
}

impl TaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` means the caller has to fetch.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<Task>>> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Stores `tasks` under a key that has no entry yet. Returns `false` and
    /// leaves the existing entry alone otherwise.
    pub fn put(&mut self, key: impl Into<String>, tasks: impl Into<Arc<Vec<Task>>>) -> bool {
        let key = key.into();
        if self.entries.contains_key(&key) {
            debug!(key = %key, "cache entry already populated; keeping it");
            return false;
        }
        let tasks = tasks.into();
        debug!(key = %key, count = tasks.len(), "cached tasks");
        self.entries.insert(key, tasks);
        true
    }

    pub fn replace(&mut self, key: impl Into<String>, tasks: impl Into<Arc<Vec<Task>>>) {
        let key = key.into();
        let tasks = tasks.into();
        debug!(key = %key, count = tasks.len(), "replaced cache entry");
        self.entries.insert(key, tasks);
    }

    pub fn remove(&mut self, key: &str) -> Option<Arc<Vec<Task>>> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        debug!(entries = self.entries.len(), "clearing task cache");
        self.entries.clear();
    }

    /// Every cached task, ordered by date key ascending, then by the order
    /// each entry was fetched in.
    pub fn get_all(&self) -> Vec<Task> {
        self.entries
            .values()
            .flat_map(|tasks| tasks.iter().cloned())
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Appends tasks from `incoming` whose id is not already present. The first
/// occurrence of an id wins and relative order is kept.
pub fn merge_into_flat_list(existing: &[Task], incoming: &[Task]) -> Vec<Task> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(existing.len() + incoming.len());
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());

    for task in existing.iter().chain(incoming) {
        if seen.insert(task.id.as_str()) {
            merged.push(task.clone());
        }
    }

    debug!(
        existing = existing.len(),
        incoming = incoming.len(),
        merged = merged.len(),
        "merged task lists"
    );
    merged
}
