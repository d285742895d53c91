//! Durable key-value storage used by the engine.
//!
//! The engine only needs five operations from its store. Writes that
//! completed before the process exited must survive a restart.

pub mod memory;
pub mod records;
pub mod sqlite;

use std::future::Future;

pub use memory::MemoryStore;
pub use records::{AppData, LoadedState, PersistedState};
pub use sqlite::SqliteStore;

/// Async string-keyed store
pub trait KeyValueStore: Send + Sync + 'static {
  fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

  fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

  fn remove(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

  fn remove_many(&self, keys: &[String]) -> impl Future<Output = Result<(), StoreError>> + Send;

  fn list_keys(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}

/// Storage failures. All of them are transient from the engine's point of view.
#[derive(Debug)]
pub enum StoreError {
  /// Store mutex poisoned by a panicking writer
  Unavailable,
  Io(String),
  Serialize(String),
}

impl std::fmt::Display for StoreError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StoreError::Unavailable => write!(f, "Store unavailable"),
      StoreError::Io(err) => write!(f, "Store I/O error: {}", err),
      StoreError::Serialize(err) => write!(f, "Could not serialize record: {}", err),
    }
  }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
  fn from(err: rusqlite::Error) -> Self {
    StoreError::Io(err.to_string())
  }
}

impl From<serde_json::Error> for StoreError {
  fn from(err: serde_json::Error) -> Self {
    StoreError::Serialize(err.to_string())
  }
}

/// Extension trait for logging errors before discarding them
pub trait LogOnError<T> {
  /// Log the error at warn level and return None
  fn log_warn(self, context: &str) -> Option<T>;
  /// Log the error at warn level and return the default
  fn log_warn_default(self, context: &str) -> T
  where
    T: Default;
}

impl<T, E: std::fmt::Display> LogOnError<T> for Result<T, E> {
  fn log_warn(self, context: &str) -> Option<T> {
    match self {
      Ok(v) => Some(v),
      Err(e) => {
        tracing::warn!("{}: {}", context, e);
        None
      }
    }
  }

  fn log_warn_default(self, context: &str) -> T
  where
    T: Default,
  {
    match self {
      Ok(v) => v,
      Err(e) => {
        tracing::warn!("{}: {}", context, e);
        T::default()
      }
    }
  }
}

/// Names of the records the engine owns. The store may be shared with other
/// subsystems, so every key goes through here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
  prefix: String,
}

impl Default for StorageKeys {
  fn default() -> Self {
    Self::with_prefix("")
  }
}

impl StorageKeys {
  pub const LAST_DAY: &'static str = "lastDayDate";
  pub const APP_DATA: &'static str = "appData";
  pub const VIEWED: &'static str = "viewedChallenges";
  pub const SELECTED: &'static str = "selectedChallenges";

  pub fn with_prefix(prefix: impl Into<String>) -> Self {
    Self { prefix: prefix.into() }
  }

  fn key(&self, name: &str) -> String {
    format!("{}{}", self.prefix, name)
  }

  pub fn last_day(&self) -> String {
    self.key(Self::LAST_DAY)
  }

  pub fn app_data(&self) -> String {
    self.key(Self::APP_DATA)
  }

  pub fn viewed(&self) -> String {
    self.key(Self::VIEWED)
  }

  pub fn selected(&self) -> String {
    self.key(Self::SELECTED)
  }

  /// True if `key` is one of ours
  pub fn owns(&self, key: &str) -> bool {
    key.strip_prefix(self.prefix.as_str())
      .is_some_and(|name| [Self::LAST_DAY, Self::APP_DATA, Self::VIEWED, Self::SELECTED].contains(&name))
  }
}
