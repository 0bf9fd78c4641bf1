//! Async MultiMap
//!
//! Non-blocking adapter over a named key to value-set map. The event bus
//! registers every handler location under its address here and picks one
//! per message with `ChoosableSet::choose`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::codec::{decode, encode};
use crate::engine::{EngineResult, MultiMapStore};
use crate::error::Result;

/// Snapshot of the values under one key.
///
/// `choose` walks the values round-robin; the set itself never changes.
#[derive(Debug)]
pub struct ChoosableSet<V> {
    values: Vec<V>,
    cursor: AtomicUsize,
}

impl<V> ChoosableSet<V> {
    pub fn new(values: Vec<V>) -> Self {
        Self {
            values,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next value in round-robin order, `None` if empty
    pub fn choose(&self) -> Option<&V> {
        if self.values.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.values.len();
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, V> {
        self.values.iter()
    }

    pub fn into_vec(self) -> Vec<V> {
        self.values
    }
}

impl<V: PartialEq> ChoosableSet<V> {
    pub fn contains(&self, value: &V) -> bool {
        self.values.contains(value)
    }
}

impl<V: Clone> Clone for ChoosableSet<V> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            cursor: AtomicUsize::new(self.cursor.load(Ordering::Relaxed)),
        }
    }
}

impl<V> IntoIterator for ChoosableSet<V> {
    type Item = V;
    type IntoIter = std::vec::IntoIter<V>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a, V> IntoIterator for &'a ChoosableSet<V> {
    type Item = &'a V;
    type IntoIter = std::slice::Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Non-blocking view of a named distributed multimap
pub struct AsyncMultiMap<K, V> {
    name: String,
    store: Arc<dyn MultiMapStore>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for AsyncMultiMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> AsyncMultiMap<K, V>
where
    K: Serialize,
    V: Serialize + DeserializeOwned,
{
    pub(crate) fn new(name: &str, store: Arc<dyn MultiMapStore>) -> Self {
        Self {
            name: name.to_string(),
            store,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a value under the key. Adding a value twice keeps one copy.
    pub async fn add(&self, key: &K, value: &V) -> Result<()> {
        let (key, value) = (encode(key)?, encode(value)?);
        self.offload(move |store| store.put(key, value)).await?;
        Ok(())
    }

    /// Snapshot of the values under the key
    pub async fn get(&self, key: &K) -> Result<ChoosableSet<V>> {
        let key = encode(key)?;
        let raw = self.offload(move |store| store.get(&key)).await?;
        let values = raw
            .iter()
            .map(|bytes| decode(bytes))
            .collect::<Result<Vec<V>>>()?;
        Ok(ChoosableSet::new(values))
    }

    /// Remove one value; returns false if it was not registered
    pub async fn remove(&self, key: &K, value: &V) -> Result<bool> {
        let (key, value) = (encode(key)?, encode(value)?);
        self.offload(move |store| store.remove(&key, &value)).await
    }

    /// Remove every value under the key, returning them
    pub async fn remove_all(&self, key: &K) -> Result<Vec<V>> {
        let key = encode(key)?;
        let raw = self.offload(move |store| store.remove_all(&key)).await?;
        raw.iter().map(|bytes| decode(bytes)).collect()
    }

    /// Remove the value under every key, returning how many keys held it
    pub async fn remove_all_for_value(&self, value: &V) -> Result<usize> {
        let value = encode(value)?;
        self.offload(move |store| store.remove_all_for_value(&value))
            .await
    }

    /// Number of keys with at least one value
    pub async fn key_count(&self) -> Result<usize> {
        self.offload(|store| store.key_count()).await
    }

    async fn offload<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn MultiMapStore) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let value = tokio::task::spawn_blocking(move || op(store.as_ref())).await??;
        Ok(value)
    }
}
