//! Coalescing snapshot writer.
//!
//! Mutations only bump the ledger generation and wake the writer. The
//! writer serializes the latest full snapshot, never a delta, so writes that
//! land out of order cannot lose an update. Writes are serialized by
//! `write_lock` and capture the snapshot after taking it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::EngineError;
use crate::ledger::QuotaLedger;
use crate::store::records::{clear_state, write_state};
use crate::store::{KeyValueStore, StorageKeys, StoreError};

pub(crate) fn lock_ledger(ledger: &Mutex<QuotaLedger>) -> MutexGuard<'_, QuotaLedger> {
  ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct SnapshotWriter<S> {
  store: Arc<S>,
  keys: StorageKeys,
  write_lock: tokio::sync::Mutex<()>,
  wake: Arc<Notify>,
  persisted_generation: AtomicU64,
}

impl<S: KeyValueStore> SnapshotWriter<S> {
  pub(crate) fn new(store: Arc<S>, keys: StorageKeys, persisted_generation: u64) -> Self {
    Self {
      store,
      keys,
      write_lock: tokio::sync::Mutex::new(()),
      wake: Arc::new(Notify::new()),
      persisted_generation: AtomicU64::new(persisted_generation),
    }
  }

  /// Ask the background task for a write. Repeated calls before it runs
  /// collapse into one.
  pub(crate) fn schedule(&self) {
    self.wake.notify_one();
  }

  pub(crate) fn wake_handle(&self) -> Arc<Notify> {
    Arc::clone(&self.wake)
  }

  /// Persist the current snapshot unless it is already on disk. Returns
  /// whether a write happened.
  pub(crate) async fn write_latest(&self, ledger: &Mutex<QuotaLedger>) -> Result<bool, StoreError> {
    let _guard = self.write_lock.lock().await;

    let (generation, state) = {
      let ledger = lock_ledger(ledger);
      (ledger.generation(), ledger.to_persisted())
    };
    if generation <= self.persisted_generation.load(Ordering::SeqCst) {
      return Ok(false);
    }

    write_state(self.store.as_ref(), &self.keys, &state).await?;
    self.persisted_generation.store(generation, Ordering::SeqCst);
    tracing::debug!("Persisted engine state (generation {})", generation);
    Ok(true)
  }

  /// Swap in the ledger built by `fresh` and delete every engine-owned
  /// record. Refused while a completion is pending; the check and the swap
  /// share one ledger lock, taken after the write lock, so no ticket can
  /// start in between.
  ///
  /// If the delete fails a write of the fresh snapshot is scheduled, so the
  /// old records are overwritten as soon as the store recovers.
  pub(crate) async fn wipe(
    &self,
    ledger: &Mutex<QuotaLedger>,
    fresh: impl FnOnce(&QuotaLedger) -> QuotaLedger,
  ) -> Result<usize, EngineError> {
    let _guard = self.write_lock.lock().await;

    let generation = {
      let mut current = lock_ledger(ledger);
      if current.completion_pending() {
        return Err(EngineError::CompletionPending);
      }
      let replacement = fresh(&current);
      let generation = replacement.generation();
      *current = replacement;
      generation
    };

    match clear_state(self.store.as_ref(), &self.keys).await {
      Ok(removed) => {
        self.persisted_generation.store(generation, Ordering::SeqCst);
        Ok(removed)
      }
      Err(e) => {
        self.schedule();
        Err(e.into())
      }
    }
  }
}
