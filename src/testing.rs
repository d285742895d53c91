//! Test doubles for the engine's collaborators.
//!
//! Provides a settable day clock, a scripted challenge service and a store
//! wrapper that can be told to fail writes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::clock::{DayClock, DayId};
use crate::domain::ChallengeId;
use crate::remote::{ChallengeApi, ProfileStats, RemoteError};
use crate::store::{KeyValueStore, MemoryStore, StoreError};

/// Day clock moved by hand. Clones share the same day.
#[derive(Debug, Clone)]
pub struct ManualDayClock {
  today: Arc<Mutex<DayId>>,
}

impl ManualDayClock {
  pub fn new(day: &str) -> Self {
    Self {
      today: Arc::new(Mutex::new(DayId::parse(day).expect("valid test day"))),
    }
  }

  pub fn set(&self, day: &str) {
    *self.today.lock().unwrap() = DayId::parse(day).expect("valid test day");
  }

  pub fn advance_days(&self, days: u64) {
    let mut today = self.today.lock().unwrap();
    let next = today.date() + chrono::Days::new(days);
    *today = DayId::new(next);
  }
}

impl DayClock for ManualDayClock {
  fn current_day_id(&self) -> DayId {
    *self.today.lock().unwrap()
  }
}

/// Challenge service with canned answers and call counters
pub struct ScriptedApi {
  complete_result: Mutex<Option<RemoteError>>,
  stats_result: Mutex<Result<ProfileStats, RemoteError>>,
  pub complete_calls: AtomicUsize,
  pub stats_calls: AtomicUsize,
  completed_ids: Mutex<Vec<ChallengeId>>,
  /// When set, `complete_challenge` waits for `release()` before answering
  gated: AtomicBool,
  gate: Notify,
  entered: Notify,
}

impl ScriptedApi {
  pub fn accepting(streak: u32, total_completed: u32) -> Self {
    let api = Self::default();
    api.set_stats(Ok(ProfileStats {
      streak,
      total_completed,
      daily_stats: Vec::new(),
    }));
    api
  }

  pub fn rejecting(error: RemoteError) -> Self {
    let api = Self::accepting(0, 0);
    api.fail_complete(Some(error));
    api
  }

  pub fn fail_complete(&self, error: Option<RemoteError>) {
    *self.complete_result.lock().unwrap() = error;
  }

  pub fn set_stats(&self, result: Result<ProfileStats, RemoteError>) {
    *self.stats_result.lock().unwrap() = result;
  }

  pub fn hold_completions(&self) {
    self.gated.store(true, Ordering::SeqCst);
  }

  pub fn release(&self) {
    self.gated.store(false, Ordering::SeqCst);
    self.gate.notify_waiters();
  }

  /// Resolves once a completion call is parked on the gate
  pub async fn wait_entered(&self) {
    self.entered.notified().await;
  }

  pub fn completed_ids(&self) -> Vec<ChallengeId> {
    self.completed_ids.lock().unwrap().clone()
  }
}

impl Default for ScriptedApi {
  fn default() -> Self {
    Self {
      complete_result: Mutex::new(None),
      stats_result: Mutex::new(Ok(ProfileStats::default())),
      complete_calls: AtomicUsize::new(0),
      stats_calls: AtomicUsize::new(0),
      completed_ids: Mutex::new(Vec::new()),
      gated: AtomicBool::new(false),
      gate: Notify::new(),
      entered: Notify::new(),
    }
  }
}

impl ChallengeApi for ScriptedApi {
  async fn complete_challenge(&self, id: ChallengeId) -> Result<(), RemoteError> {
    self.complete_calls.fetch_add(1, Ordering::SeqCst);
    if self.gated.load(Ordering::SeqCst) {
      let released = self.gate.notified();
      self.entered.notify_one();
      released.await;
    }
    let result = self.complete_result.lock().unwrap().clone();
    match result {
      Some(err) => Err(err),
      None => {
        self.completed_ids.lock().unwrap().push(id);
        Ok(())
      }
    }
  }

  async fn fetch_stats(&self) -> Result<ProfileStats, RemoteError> {
    self.stats_calls.fetch_add(1, Ordering::SeqCst);
    self.stats_result.lock().unwrap().clone()
  }
}

/// Memory store whose writes can be switched to fail or held open
#[derive(Default)]
pub struct FlakyStore {
  pub inner: MemoryStore,
  failing: AtomicBool,
  failing_removes: AtomicBool,
  pub set_calls: AtomicUsize,
  /// When set, `set` waits for `release_writes()` before writing
  gated: AtomicBool,
  gate: Notify,
  entered: Notify,
}

impl FlakyStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_writes(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Fail only `remove` and `remove_many`
  pub fn fail_removes(&self, failing: bool) {
    self.failing_removes.store(failing, Ordering::SeqCst);
  }

  pub fn hold_writes(&self) {
    self.gated.store(true, Ordering::SeqCst);
  }

  pub fn release_writes(&self) {
    self.gated.store(false, Ordering::SeqCst);
    self.gate.notify_waiters();
  }

  /// Resolves once a `set` is parked on the gate
  pub async fn wait_write_entered(&self) {
    self.entered.notified().await;
  }

  fn check_remove(&self) -> Result<(), StoreError> {
    if self.failing_removes.load(Ordering::SeqCst) {
      Err(StoreError::Io("read-only filesystem".to_string()))
    } else {
      self.check()
    }
  }

  fn check(&self) -> Result<(), StoreError> {
    if self.failing.load(Ordering::SeqCst) {
      Err(StoreError::Io("disk full".to_string()))
    } else {
      Ok(())
    }
  }
}

impl KeyValueStore for FlakyStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    self.inner.get(key).await
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    self.set_calls.fetch_add(1, Ordering::SeqCst);
    if self.gated.load(Ordering::SeqCst) {
      let released = self.gate.notified();
      self.entered.notify_one();
      released.await;
    }
    self.check()?;
    self.inner.set(key, value).await
  }

  async fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.check_remove()?;
    self.inner.remove(key).await
  }

  async fn remove_many(&self, keys: &[String]) -> Result<(), StoreError> {
    self.check_remove()?;
    self.inner.remove_many(keys).await
  }

  async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
    self.inner.list_keys().await
  }
}
