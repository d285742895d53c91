use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::{KeyValueStore, StoreError};

/// Process-local store for guest sessions and tests. Nothing survives exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed with existing records
  pub fn with_entries<K: Into<String>, V: Into<String>>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
    Self {
      entries: Mutex::new(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
    }
  }

  fn with_map<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> Result<T, StoreError> {
    let mut map = self
      .entries
      .lock()
      .map_err(|_: PoisonError<_>| StoreError::Unavailable)?;
    Ok(f(&mut map))
  }
}

impl KeyValueStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    self.with_map(|map| map.get(key).cloned())
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    self.with_map(|map| {
      map.insert(key.to_string(), value.to_string());
    })
  }

  async fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.with_map(|map| {
      map.remove(key);
    })
  }

  async fn remove_many(&self, keys: &[String]) -> Result<(), StoreError> {
    self.with_map(|map| {
      for key in keys {
        map.remove(key);
      }
    })
  }

  async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
    self.with_map(|map| map.keys().cloned().collect())
  }
}
