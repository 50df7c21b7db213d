// src/slots.rs
//
// Keyed records, each behind its own lock. The outer map lock is only held
// long enough to find or create a slot; reads and writes of a record happen
// under that record's mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

pub struct Slots<T> {
    inner: RwLock<HashMap<String, Arc<Mutex<Option<T>>>>>,
}

impl<T> Slots<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &str) -> Option<Arc<Mutex<Option<T>>>> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(key).cloned()
    }

    fn slot_or_insert(&self, key: &str) -> Arc<Mutex<Option<T>>> {
        if let Some(slot) = self.slot(key) {
            return slot;
        }
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Runs `f` against the record, creating an empty slot first if needed.
    pub fn upsert<R>(&self, key: &str, f: impl FnOnce(&mut Option<T>) -> R) -> R {
        let slot = self.slot_or_insert(key);
        let mut record = slot.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut record)
    }

    /// Runs `f` against an existing record. Returns `None` for unknown keys
    /// without allocating a slot.
    pub fn with_existing<R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let slot = self.slot(key)?;
        let mut record = slot.lock().unwrap_or_else(|e| e.into_inner());
        record.as_mut().map(f)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Slots<T> {
    /// Point-in-time copy of every populated record, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, T)> {
        let slots: Vec<(String, Arc<Mutex<Option<T>>>)> = {
            let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let mut out: Vec<(String, T)> = slots
            .into_iter()
            .filter_map(|(k, slot)| {
                let record = slot.lock().unwrap_or_else(|e| e.into_inner());
                record.clone().map(|r| (k, r))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self::new()
    }
}
