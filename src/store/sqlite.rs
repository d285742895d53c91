//! SQLite-backed key-value store

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{KeyValueStore, StoreError};

pub type StorePool = Arc<Mutex<Connection>>;

/// Single-table store. Every write is its own transaction, so a write that
/// returned before the process exited is durable.
#[derive(Clone)]
pub struct SqliteStore {
  pool: StorePool,
}

pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
  conn.execute_batch(
    r#"
  CREATE TABLE IF NOT EXISTS kv (
   key TEXT PRIMARY KEY,
   value TEXT NOT NULL,
   updated_at TEXT NOT NULL DEFAULT (datetime('now'))
  );
  "#,
  )
}

impl SqliteStore {
  /// Open (creating if needed) the store file and run migrations
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
    }

    let conn = Connection::open(path)?;
    run_migrations(&conn)?;
    Ok(Self {
      pool: Arc::new(Mutex::new(conn)),
    })
  }

  /// In-memory database, mostly for tests
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory()?;
    run_migrations(&conn)?;
    Ok(Self {
      pool: Arc::new(Mutex::new(conn)),
    })
  }

  /// Run `f` against the connection on the blocking pool so SQLite I/O
  /// never stalls a runtime worker.
  async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
  {
    let pool = Arc::clone(&self.pool);
    tokio::task::spawn_blocking(move || {
      let mut conn = try_lock(&pool)?;
      f(&mut conn)
    })
    .await
    .map_err(|e| StoreError::Io(format!("store task failed: {}", e)))?
  }
}

fn try_lock(pool: &StorePool) -> Result<MutexGuard<'_, Connection>, StoreError> {
  pool.lock().map_err(|_: PoisonError<_>| {
    tracing::error!("Store mutex poisoned - a thread panicked while holding the lock");
    StoreError::Unavailable
  })
}

impl KeyValueStore for SqliteStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    let key = key.to_string();
    self
      .with_conn(move |conn| {
        let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
          Some(row) => Ok(Some(row.get(0)?)),
          None => Ok(None),
        }
      })
      .await
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    let (key, value) = (key.to_string(), value.to_string());
    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
          ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
          params![key, value],
        )?;
        Ok(())
      })
      .await
  }

  async fn remove(&self, key: &str) -> Result<(), StoreError> {
    let key = key.to_string();
    self
      .with_conn(move |conn| {
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
      })
      .await
  }

  async fn remove_many(&self, keys: &[String]) -> Result<(), StoreError> {
    let keys = keys.to_vec();
    self
      .with_conn(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare("DELETE FROM kv WHERE key = ?1")?;
          for key in &keys {
            stmt.execute(params![key])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await
  }

  async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
    self
      .with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
      })
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn create_test_store() -> (TempDir, SqliteStore) {
    let temp = TempDir::new().unwrap();
    let store = SqliteStore::open(&temp.path().join("nested").join("engine.db")).unwrap();
    (temp, store)
  }

  #[tokio::test]
  async fn test_get_missing_key() {
    let (_temp, store) = create_test_store();
    assert_eq!(store.get("appData").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_set_overwrites() {
    let (_temp, store) = create_test_store();
    store.set("lastDayDate", "2024-05-01").await.unwrap();
    store.set("lastDayDate", "2024-05-02").await.unwrap();
    assert_eq!(store.get("lastDayDate").await.unwrap().as_deref(), Some("2024-05-02"));
    assert_eq!(store.list_keys().await.unwrap(), vec!["lastDayDate".to_string()]);
  }

  #[tokio::test]
  async fn test_remove_and_remove_many() {
    let (_temp, store) = create_test_store();
    for key in ["a", "b", "c", "authToken"] {
      store.set(key, "1").await.unwrap();
    }

    store.remove("a").await.unwrap();
    store.remove("missing").await.unwrap();
    store
      .remove_many(&["b".to_string(), "c".to_string()])
      .await
      .unwrap();

    assert_eq!(store.list_keys().await.unwrap(), vec!["authToken".to_string()]);
  }

  #[tokio::test]
  async fn test_values_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("engine.db");
    {
      let store = SqliteStore::open(&path).unwrap();
      store.set("viewedChallenges", "[1,2,3]").await.unwrap();
    }

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(
      reopened.get("viewedChallenges").await.unwrap().as_deref(),
      Some("[1,2,3]")
    );
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_concurrent_writers_share_connection() {
    let (_temp, store) = create_test_store();
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for i in 0..16 {
      let store = Arc::clone(&store);
      handles.push(tokio::spawn(async move {
        store.set(&format!("key{:02}", i), &i.to_string()).await
      }));
    }
    for handle in handles {
      handle.await.unwrap().unwrap();
    }

    assert_eq!(store.list_keys().await.unwrap().len(), 16);
    assert_eq!(store.get("key07").await.unwrap().as_deref(), Some("7"));
  }

  #[tokio::test]
  async fn test_in_memory_store() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.set("k", "v").await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
  }
}
