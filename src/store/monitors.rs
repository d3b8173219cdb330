//! Registry of in-flight execution monitors

use dashmap::DashMap;

/// Active executions indexed by execution id
pub struct MonitorRegistry<M> {
    monitors: DashMap<String, M>,
}

impl<M: Clone> MonitorRegistry<M> {
    pub fn new() -> Self {
        Self {
            monitors: DashMap::new(),
        }
    }

    pub fn insert(&self, id: String, monitor: M) {
        self.monitors.insert(id, monitor);
    }

    pub fn get(&self, id: &str) -> Option<M> {
        self.monitors.get(id).map(|m| m.clone())
    }

    /// Mutate a monitor in place under its shard lock
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut M) -> R) -> Option<R> {
        self.monitors.get_mut(id).map(|mut m| f(&mut m))
    }

    pub fn remove(&self, id: &str) -> Option<M> {
        self.monitors.remove(id).map(|(_, m)| m)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.monitors.contains_key(id)
    }

    pub fn values(&self) -> Vec<M> {
        self.monitors.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

impl<M: Clone> Default for MonitorRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}
