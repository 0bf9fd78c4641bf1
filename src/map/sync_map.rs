//! Blocking Map
//!
//! Direct pass-through to the engine's blocking map interface. Every call
//! may wait on an engine round-trip; use `AsyncMap` on async code paths.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

use super::codec::{decode, decode_opt, encode};
use crate::engine::MapStore;
use crate::error::Result;

/// Blocking view of a named distributed map
pub struct SyncMap<K, V> {
    name: String,
    store: Arc<dyn MapStore>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for SyncMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> SyncMap<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    pub(crate) fn new(name: &str, store: Arc<dyn MapStore>) -> Self {
        Self {
            name: name.to_string(),
            store,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        decode_opt(self.store.get(&encode(key)?)?)
    }

    /// Insert or overwrite, returning the previous value
    pub fn put(&self, key: &K, value: &V) -> Result<Option<V>> {
        decode_opt(self.store.put(encode(key)?, encode(value)?)?)
    }

    /// Insert only if absent, returning the existing value otherwise
    pub fn put_if_absent(&self, key: &K, value: &V) -> Result<Option<V>> {
        decode_opt(self.store.put_if_absent(encode(key)?, encode(value)?)?)
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        decode_opt(self.store.remove(&encode(key)?)?)
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.store.contains_key(&encode(key)?)?)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.store.is_empty()?)
    }

    pub fn clear(&self) -> Result<()> {
        Ok(self.store.clear()?)
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Result<Vec<(K, V)>> {
        self.store
            .entries()?
            .iter()
            .map(|(key, value)| -> Result<(K, V)> { Ok((decode(key)?, decode(value)?)) })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, MapConfig};
    use crate::engine::{Engine, EngineConnection, EngineError, MemoryEngine, StartOptions};
    use crate::error::ClusterError;

    fn connect(engine: &MemoryEngine, config: EngineConfig) -> Arc<dyn EngineConnection> {
        engine.start(config, StartOptions::default()).unwrap()
    }

    #[test]
    fn test_basic_operations() {
        let engine = MemoryEngine::new();
        let conn = connect(&engine, EngineConfig::default());
        let map: SyncMap<String, u64> = SyncMap::new("counters", conn.map("counters"));

        let key = "requests".to_string();
        assert_eq!(map.put(&key, &1).unwrap(), None);
        assert_eq!(map.put(&key, &2).unwrap(), Some(1));
        assert_eq!(map.get(&key).unwrap(), Some(2));
        assert_eq!(map.put_if_absent(&key, &9).unwrap(), Some(2));
        assert!(map.contains_key(&key).unwrap());
        assert_eq!(map.len().unwrap(), 1);

        assert_eq!(map.remove(&key).unwrap(), Some(2));
        assert!(map.is_empty().unwrap());
    }

    #[test]
    fn test_entries_and_clear() {
        let engine = MemoryEngine::new();
        let conn = connect(&engine, EngineConfig::default());
        let map: SyncMap<u32, String> = SyncMap::new("names", conn.map("names"));

        map.put(&1, &"one".to_string()).unwrap();
        map.put(&2, &"two".to_string()).unwrap();

        let mut entries = map.entries().unwrap();
        entries.sort();
        assert_eq!(entries, vec![(1, "one".to_string()), (2, "two".to_string())]);

        map.clear().unwrap();
        assert_eq!(map.len().unwrap(), 0);
    }

    #[test]
    fn test_views_share_the_named_map() {
        let engine = MemoryEngine::new();
        let a = connect(&engine, EngineConfig::default());
        let b = connect(&engine, EngineConfig::default());

        let on_a: SyncMap<String, String> = SyncMap::new("owners", a.map("owners"));
        let on_b: SyncMap<String, String> = SyncMap::new("owners", b.map("owners"));

        on_a.put(&"lock".to_string(), &"a".to_string()).unwrap();
        assert_eq!(on_b.get(&"lock".to_string()).unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_engine_failure_is_returned() {
        let engine = MemoryEngine::new();
        let config = EngineConfig::default().with_map("small", MapConfig::bounded(1));
        let conn = connect(&engine, config);
        let map: SyncMap<u8, u8> = SyncMap::new("small", conn.map("small"));

        map.put(&1, &1).unwrap();
        let err = map.put(&2, &2).unwrap_err();
        assert!(matches!(
            err,
            ClusterError::Engine(EngineError::CapacityExceeded { limit: 1, .. })
        ));

        conn.shutdown();
        assert!(matches!(
            map.get(&1).unwrap_err(),
            ClusterError::Engine(EngineError::ShutDown)
        ));
    }
}
