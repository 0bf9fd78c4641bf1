//! Distributed Maps
//!
//! Typed adapters over the engine's named maps. Keys and values are
//! serialized with bincode, so any `Serialize + DeserializeOwned` type can
//! be stored.

mod async_map;
mod async_multi_map;
mod codec;
mod sync_map;

pub use async_map::AsyncMap;
pub use async_multi_map::{AsyncMultiMap, ChoosableSet};
pub use sync_map::SyncMap;
