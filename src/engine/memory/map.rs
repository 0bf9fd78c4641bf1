//! In-Memory Maps
//!
//! DashMap-backed maps shared by every member of a cluster, and the
//! per-connection handles that enforce shutdown and entry limits.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hashbrown::HashSet;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::{EngineError, EngineResult, MapStore, MultiMapStore};

/// DashMap requires a power of two
fn shard_amount() -> usize {
    (num_cpus::get() * 4).next_power_of_two()
}

/// Key/value storage shared across the members of one cluster.
#[derive(Debug)]
pub(super) struct MemoryMap {
    entries: DashMap<Bytes, Bytes>,
    /// Serialises inserts that must respect an entry limit
    gate: Mutex<()>,
}

impl MemoryMap {
    pub(super) fn new() -> Self {
        Self {
            entries: DashMap::with_shard_amount(shard_amount()),
            gate: Mutex::new(()),
        }
    }

    /// Run `insert` if `key` fits under `limit`, `None` when the map is full.
    ///
    /// Overwriting an existing key always fits. Bounded inserts hold the
    /// gate across the check and the insert, so two of them can never both
    /// take the last free slot.
    fn with_room<T>(
        &self,
        key: Bytes,
        limit: Option<usize>,
        insert: impl FnOnce(Bytes) -> T,
    ) -> Option<T> {
        let Some(limit) = limit else {
            return Some(insert(key));
        };
        let _gate = self.gate.lock();
        if self.entries.contains_key(&key) || self.entries.len() < limit {
            Some(insert(key))
        } else {
            None
        }
    }

    fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.entries.get(key).map(|value| value.value().clone())
    }

    fn put(&self, key: Bytes, value: Bytes) -> Option<Bytes> {
        self.entries.insert(key, value)
    }

    fn put_if_absent(&self, key: Bytes, value: Bytes) -> Option<Bytes> {
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => Some(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(value);
                None
            }
        }
    }

    fn remove(&self, key: &[u8]) -> Option<Bytes> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    fn remove_if_equal(&self, key: &[u8], value: &[u8]) -> bool {
        self.entries
            .remove_if(key, |_, current| current.as_ref() == value)
            .is_some()
    }

    fn replace(&self, key: &[u8], value: Bytes) -> Option<Bytes> {
        let mut current = self.entries.get_mut(key)?;
        Some(std::mem::replace(current.value_mut(), value))
    }

    fn replace_if_equal(&self, key: &[u8], expected: &[u8], value: Bytes) -> bool {
        match self.entries.get_mut(key) {
            Some(mut current) if current.as_ref() == expected => {
                *current = value;
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entries(&self) -> Vec<(Bytes, Bytes)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Key to value-set storage shared across the members of one cluster.
///
/// Keys whose set becomes empty are removed.
#[derive(Debug)]
pub(super) struct MemoryMultiMap {
    entries: DashMap<Bytes, HashSet<Bytes>>,
}

impl MemoryMultiMap {
    pub(super) fn new() -> Self {
        Self {
            entries: DashMap::with_shard_amount(shard_amount()),
        }
    }

    fn put(&self, key: Bytes, value: Bytes) -> bool {
        self.entries.entry(key).or_default().insert(value)
    }

    fn get(&self, key: &[u8]) -> Vec<Bytes> {
        self.entries
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn remove(&self, key: &[u8], value: &[u8]) -> bool {
        let removed = self
            .entries
            .get_mut(key)
            .map(|mut set| set.remove(value))
            .unwrap_or(false);
        if removed {
            self.entries.remove_if(key, |_, set| set.is_empty());
        }
        removed
    }

    fn remove_all(&self, key: &[u8]) -> Vec<Bytes> {
        self.entries
            .remove(key)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default()
    }

    fn remove_all_for_value(&self, value: &[u8]) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, set| {
            if set.remove(value) {
                removed += 1;
            }
            !set.is_empty()
        });
        removed
    }

    fn key_count(&self) -> usize {
        self.entries.len()
    }
}

/// A connection's view of a shared map
pub(super) struct MapHandle {
    name: String,
    map: Arc<MemoryMap>,
    running: Arc<AtomicBool>,
    max_entries: Option<usize>,
}

impl MapHandle {
    pub(super) fn new(
        name: &str,
        map: Arc<MemoryMap>,
        running: Arc<AtomicBool>,
        max_entries: Option<usize>,
    ) -> Self {
        Self {
            name: name.to_string(),
            map,
            running,
            max_entries,
        }
    }

    fn ensure_running(&self) -> EngineResult<()> {
        if self.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::ShutDown)
        }
    }

    fn capacity_exceeded(&self) -> EngineError {
        EngineError::CapacityExceeded {
            map: self.name.clone(),
            limit: self.max_entries.unwrap_or_default(),
        }
    }
}

impl MapStore for MapHandle {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Bytes>> {
        self.ensure_running()?;
        Ok(self.map.get(key))
    }

    fn put(&self, key: Bytes, value: Bytes) -> EngineResult<Option<Bytes>> {
        self.ensure_running()?;
        self.map
            .with_room(key, self.max_entries, |key| self.map.put(key, value))
            .ok_or_else(|| self.capacity_exceeded())
    }

    fn put_if_absent(&self, key: Bytes, value: Bytes) -> EngineResult<Option<Bytes>> {
        self.ensure_running()?;
        self.map
            .with_room(key, self.max_entries, |key| self.map.put_if_absent(key, value))
            .ok_or_else(|| self.capacity_exceeded())
    }

    fn remove(&self, key: &[u8]) -> EngineResult<Option<Bytes>> {
        self.ensure_running()?;
        Ok(self.map.remove(key))
    }

    fn remove_if_equal(&self, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        self.ensure_running()?;
        Ok(self.map.remove_if_equal(key, value))
    }

    fn replace(&self, key: Bytes, value: Bytes) -> EngineResult<Option<Bytes>> {
        self.ensure_running()?;
        Ok(self.map.replace(&key, value))
    }

    fn replace_if_equal(&self, key: Bytes, expected: &[u8], value: Bytes) -> EngineResult<bool> {
        self.ensure_running()?;
        Ok(self.map.replace_if_equal(&key, expected, value))
    }

    fn contains_key(&self, key: &[u8]) -> EngineResult<bool> {
        self.ensure_running()?;
        Ok(self.map.get(key).is_some())
    }

    fn len(&self) -> EngineResult<usize> {
        self.ensure_running()?;
        Ok(self.map.len())
    }

    fn clear(&self) -> EngineResult<()> {
        self.ensure_running()?;
        self.map.clear();
        Ok(())
    }

    fn entries(&self) -> EngineResult<Vec<(Bytes, Bytes)>> {
        self.ensure_running()?;
        Ok(self.map.entries())
    }
}

/// A connection's view of a shared multimap
pub(super) struct MultiMapHandle {
    map: Arc<MemoryMultiMap>,
    running: Arc<AtomicBool>,
}

impl MultiMapHandle {
    pub(super) fn new(map: Arc<MemoryMultiMap>, running: Arc<AtomicBool>) -> Self {
        Self { map, running }
    }

    fn ensure_running(&self) -> EngineResult<()> {
        if self.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::ShutDown)
        }
    }
}

impl MultiMapStore for MultiMapHandle {
    fn put(&self, key: Bytes, value: Bytes) -> EngineResult<bool> {
        self.ensure_running()?;
        Ok(self.map.put(key, value))
    }

    fn get(&self, key: &[u8]) -> EngineResult<Vec<Bytes>> {
        self.ensure_running()?;
        Ok(self.map.get(key))
    }

    fn remove(&self, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        self.ensure_running()?;
        Ok(self.map.remove(key, value))
    }

    fn remove_all(&self, key: &[u8]) -> EngineResult<Vec<Bytes>> {
        self.ensure_running()?;
        Ok(self.map.remove_all(key))
    }

    fn remove_all_for_value(&self, value: &[u8]) -> EngineResult<usize> {
        self.ensure_running()?;
        Ok(self.map.remove_all_for_value(value))
    }

    fn key_count(&self) -> EngineResult<usize> {
        self.ensure_running()?;
        Ok(self.map.key_count())
    }
}
