//! Async Map
//!
//! Non-blocking key/value adapter. Engine calls run on the runtime's
//! blocking pool and the result, including any failure, is delivered
//! through the returned future. Must be awaited inside a Tokio runtime.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

use super::codec::{decode_opt, encode};
use crate::engine::{EngineResult, MapStore};
use crate::error::Result;

/// Non-blocking view of a named distributed map
pub struct AsyncMap<K, V> {
    name: String,
    store: Arc<dyn MapStore>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for AsyncMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> AsyncMap<K, V>
where
    K: Serialize,
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

    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let key = encode(key)?;
        decode_opt(self.offload(move |store| store.get(&key)).await?)
    }

    pub async fn put(&self, key: &K, value: &V) -> Result<()> {
        let (key, value) = (encode(key)?, encode(value)?);
        self.offload(move |store| store.put(key, value)).await?;
        Ok(())
    }

    /// Insert only if absent, returning the existing value otherwise
    pub async fn put_if_absent(&self, key: &K, value: &V) -> Result<Option<V>> {
        let (key, value) = (encode(key)?, encode(value)?);
        decode_opt(
            self.offload(move |store| store.put_if_absent(key, value))
                .await?,
        )
    }

    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        let key = encode(key)?;
        decode_opt(self.offload(move |store| store.remove(&key)).await?)
    }

    /// Remove only if the current value equals `value`
    pub async fn remove_if_present(&self, key: &K, value: &V) -> Result<bool> {
        let (key, value) = (encode(key)?, encode(value)?);
        self.offload(move |store| store.remove_if_equal(&key, &value))
            .await
    }

    /// Overwrite only if present, returning the previous value
    pub async fn replace(&self, key: &K, value: &V) -> Result<Option<V>> {
        let (key, value) = (encode(key)?, encode(value)?);
        decode_opt(self.offload(move |store| store.replace(key, value)).await?)
    }

    /// Overwrite only if the current value equals `old`
    pub async fn replace_if_present(&self, key: &K, old: &V, new: &V) -> Result<bool> {
        let (key, old, new) = (encode(key)?, encode(old)?, encode(new)?);
        self.offload(move |store| store.replace_if_equal(key, &old, new))
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.offload(|store| store.clear()).await
    }

    pub async fn size(&self) -> Result<usize> {
        self.offload(|store| store.len()).await
    }

    async fn offload<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn MapStore) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let value = tokio::task::spawn_blocking(move || op(store.as_ref())).await??;
        Ok(value)
    }
}
