//! Session engine.
//!
//! Owns the quota ledger and wires it to the clock, the store and the
//! challenge service. Every mutation runs under one lock and returns an
//! [`Outcome`]; persistence happens afterwards on a background writer that
//! always stores the latest full snapshot.
//!
//! Two background tasks run per engine: the writer, woken on every applied
//! change, and a ticker that re-checks the day on a fixed interval. Both
//! hold weak references and stop once the last engine handle is dropped.

mod writer;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{DayClock, DayId};
use crate::config::{EngineConfig, PREMIUM_CEILING};
use crate::domain::{Challenge, ChallengeId, DayPhase, SwipeDirection};
use crate::ledger::{Outcome, QuotaLedger, Rollover};
use crate::reconcile::{CompletionError, CompletionReceipt, CompletionReconciler};
use crate::remote::{ChallengeApi, DailyStat};
use crate::store::records::load_state;
use crate::store::{KeyValueStore, StorageKeys, StoreError};

use writer::{SnapshotWriter, lock_ledger};

/// Errors surfaced by engine lifecycle calls
#[derive(Debug)]
pub enum EngineError {
  Store(StoreError),
  /// Reset refused while a completion is waiting on the server
  CompletionPending,
}

impl fmt::Display for EngineError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EngineError::Store(e) => write!(f, "Store error: {}", e),
      EngineError::CompletionPending => write!(f, "A completion is still pending"),
    }
  }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
  fn from(err: StoreError) -> Self {
    EngineError::Store(err)
  }
}

/// Remaining allowance per quota. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Remaining {
  pub swipes: Option<u32>,
  pub skips: Option<u32>,
  pub challenges: Option<u32>,
  pub favorites: Option<usize>,
}

/// Read-only view of the whole session, as served to the UI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
  pub day: DayId,
  pub phase: DayPhase,
  pub completed_today: bool,
  pub active_challenge: Option<ChallengeId>,
  pub swipes_used_today: u32,
  pub skips_used_today: u32,
  pub challenges_taken_today: u32,
  pub remaining: Remaining,
  pub streak: u32,
  pub completed_count: u32,
  pub is_premium: bool,
  pub last_completed_date: Option<DayId>,
  pub viewed: Vec<ChallengeId>,
  pub selected: Vec<ChallengeId>,
  pub favorites: Vec<Challenge>,
  pub daily_stats: Vec<DailyStat>,
  pub completion_pending: bool,
}

fn remaining(limit: u32, used: u32) -> Option<u32> {
  (limit != PREMIUM_CEILING).then(|| limit.saturating_sub(used))
}

impl SessionSnapshot {
  fn capture(ledger: &QuotaLedger) -> Self {
    let day = ledger.day();
    let profile = ledger.profile();
    let limits = ledger.limits();
    let challenges = if limits.enforce_challenge_quota {
      Some(limits.max_challenges.saturating_sub(day.challenges_taken_today))
    } else {
      None
    };

    Self {
      day: ledger.last_day(),
      phase: ledger.phase(),
      completed_today: day.completed_today,
      active_challenge: day.active_challenge,
      swipes_used_today: day.swipes_used_today,
      skips_used_today: day.skips_used_today,
      challenges_taken_today: day.challenges_taken_today,
      remaining: Remaining {
        swipes: remaining(limits.max_swipes, day.swipes_used_today),
        skips: remaining(limits.max_skips, day.skips_used_today),
        challenges,
        favorites: (limits.max_favorites != usize::MAX)
          .then(|| limits.max_favorites.saturating_sub(ledger.favorites().len())),
      },
      streak: profile.streak,
      completed_count: profile.completed_count,
      is_premium: profile.is_premium,
      last_completed_date: profile.last_completed_date,
      viewed: ledger.viewed().to_vec(),
      selected: ledger.selected().iter().copied().collect(),
      favorites: ledger.favorites().to_vec(),
      daily_stats: ledger.daily_stats().to_vec(),
      completion_pending: ledger.completion_pending(),
    }
  }
}

struct EngineInner<S, C, A> {
  ledger: Mutex<QuotaLedger>,
  clock: C,
  writer: SnapshotWriter<S>,
  reconciler: CompletionReconciler<A>,
  config: EngineConfig,
  tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, C, A> Drop for EngineInner<S, C, A> {
  fn drop(&mut self) {
    let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
    for task in tasks.drain(..) {
      task.abort();
    }
  }
}

impl<S: KeyValueStore, C: DayClock, A: ChallengeApi> EngineInner<S, C, A> {
  fn lock(&self) -> MutexGuard<'_, QuotaLedger> {
    lock_ledger(&self.ledger)
  }

  fn rollover_locked(&self, ledger: &mut QuotaLedger) -> Rollover {
    let result = ledger.rollover_if_stale(&self.clock);
    match result {
      Rollover::RolledOver { from, to } => {
        tracing::info!("Day rolled over from {} to {}", from, to);
      }
      Rollover::Deferred => {
        tracing::debug!("Day changed during a pending completion, rollover deferred");
      }
      Rollover::Unchanged => {}
    }
    result
  }

  /// Run `f` on the ledger after a rollover check, and schedule a write if
  /// anything changed.
  fn mutate(&self, action: &'static str, f: impl FnOnce(&mut QuotaLedger) -> Outcome) -> Outcome {
    let (outcome, changed) = {
      let mut ledger = self.lock();
      let before = ledger.generation();
      self.rollover_locked(&mut ledger);
      let outcome = f(&mut ledger);
      (outcome, ledger.generation() != before)
    };

    if let Outcome::Denied(reason) = outcome {
      tracing::debug!("{} denied: {:?}", action, reason);
    }
    if changed {
      self.writer.schedule();
    }
    outcome
  }

  fn check_rollover(&self) -> bool {
    let rolled = {
      let mut ledger = self.lock();
      matches!(self.rollover_locked(&mut ledger), Rollover::RolledOver { .. })
    };
    if rolled {
      self.writer.schedule();
    }
    rolled
  }

  async fn persist(&self) {
    if let Err(e) = self.writer.write_latest(&self.ledger).await {
      tracing::warn!("Failed to persist engine state, retrying on next change: {}", e);
    }
  }
}

/// Handle to a running engine. Clones share the same state.
pub struct SessionEngine<S, C, A> {
  inner: Arc<EngineInner<S, C, A>>,
}

impl<S, C, A> Clone for SessionEngine<S, C, A> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<S: KeyValueStore, C: DayClock, A: ChallengeApi> SessionEngine<S, C, A> {
  /// Load persisted state, roll the day if needed and start the
  /// background writer and rollover ticker.
  pub async fn start(store: Arc<S>, clock: C, api: Arc<A>, config: EngineConfig) -> Result<Self, EngineError> {
    Self::start_with_keys(store, clock, api, config, StorageKeys::default()).await
  }

  pub async fn start_with_keys(
    store: Arc<S>,
    clock: C,
    api: Arc<A>,
    config: EngineConfig,
    keys: StorageKeys,
  ) -> Result<Self, EngineError> {
    let loaded = load_state(store.as_ref(), &keys).await?;
    let first_run = loaded.first_run;
    let ledger = QuotaLedger::from_loaded(loaded, clock.current_day_id(), &config);
    let persisted_generation = ledger.generation();

    let inner = Arc::new(EngineInner {
      ledger: Mutex::new(ledger),
      clock,
      writer: SnapshotWriter::new(store, keys, persisted_generation),
      reconciler: CompletionReconciler::new(api),
      config,
      tasks: Mutex::new(Vec::new()),
    });

    let today = inner.clock.current_day_id();
    if first_run {
      tracing::info!("No saved session found, starting fresh on {}", today);
    } else {
      let ledger = inner.lock();
      tracing::info!(
        "Resumed session saved on {} at {} (streak {}, {} completed)",
        ledger.last_day(),
        today,
        ledger.profile().streak,
        ledger.profile().completed_count
      );
    }
    inner.check_rollover();

    let writer = spawn_writer(&inner);
    let ticker = spawn_ticker(&inner);
    inner
      .tasks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .extend([writer, ticker]);

    Ok(Self { inner })
  }

  pub fn snapshot(&self) -> SessionSnapshot {
    let (snapshot, rolled) = {
      let mut ledger = self.inner.lock();
      let rolled = matches!(self.inner.rollover_locked(&mut ledger), Rollover::RolledOver { .. });
      (SessionSnapshot::capture(&ledger), rolled)
    };
    if rolled {
      self.inner.writer.schedule();
    }
    snapshot
  }

  pub fn config(&self) -> &EngineConfig {
    &self.inner.config
  }

  /// Count a swipe and mark the card viewed
  pub fn swipe(&self, id: ChallengeId, direction: SwipeDirection) -> Outcome {
    self.inner.mutate("swipe", |ledger| {
      let outcome = ledger.record_swipe();
      if outcome.is_applied() {
        ledger.mark_viewed(id);
        tracing::debug!("Swiped {} on challenge {}", direction.as_str(), id);
      }
      outcome
    })
  }

  pub fn mark_viewed(&self, id: ChallengeId) -> Outcome {
    self.inner.mutate("mark_viewed", |ledger| ledger.mark_viewed(id))
  }

  /// Make `id` the active challenge. Counts against the daily challenge
  /// quota unless it is already the active one.
  pub fn select_challenge(&self, id: ChallengeId) -> Outcome {
    self.inner.mutate("select_challenge", |ledger| {
      let outcome = ledger.set_active_challenge(Some(id));
      if outcome.is_applied() {
        ledger.mark_selected(id);
      }
      outcome
    })
  }

  pub fn skip(&self) -> Outcome {
    self.inner.mutate("skip", |ledger| ledger.record_skip())
  }

  pub fn add_favorite(&self, challenge: Challenge) -> Outcome {
    self.inner.mutate("add_favorite", |ledger| ledger.add_favorite(challenge))
  }

  pub fn remove_favorite(&self, id: ChallengeId) -> Outcome {
    self.inner.mutate("remove_favorite", |ledger| ledger.remove_favorite(id))
  }

  pub fn is_favorite(&self, id: ChallengeId) -> bool {
    self.inner.lock().is_favorite(id)
  }

  pub fn set_premium(&self, is_premium: bool) -> Outcome {
    self.inner.mutate("set_premium", |ledger| ledger.set_premium(is_premium))
  }

  /// Complete the active challenge against the server.
  ///
  /// The reconciliation runs on its own task, so dropping the returned
  /// future does not abandon the pending ticket.
  pub async fn complete_challenge(&self) -> Result<CompletionReceipt, CompletionError> {
    let ticket = {
      let mut ledger = self.inner.lock();
      self.inner.rollover_locked(&mut ledger);
      ledger.begin_completion()?
    };
    tracing::info!("Completing challenge {} (ticket {})", ticket.challenge_id(), ticket.seq());

    let inner = Arc::clone(&self.inner);
    let task = tokio::spawn(async move {
      let result = inner.reconciler.run(&inner.ledger, ticket).await;
      inner.writer.schedule();
      // A rollover deferred by the pending ticket can run now
      inner.check_rollover();
      result
    });

    match task.await {
      Ok(result) => result,
      Err(e) => {
        tracing::error!("Completion task failed: {}", e);
        Err(CompletionError::TransientFailure(e.to_string()))
      }
    }
  }

  /// Roll the day if the clock moved. Returns whether it did.
  pub fn check_rollover(&self) -> bool {
    self.inner.check_rollover()
  }

  /// Write the latest snapshot now
  pub async fn flush(&self) -> Result<(), StoreError> {
    self.inner.writer.write_latest(&self.inner.ledger).await.map(|_| ())
  }

  /// Forget all local state, e.g. on logout. The engine keeps running on
  /// an all-zero ledger for today.
  pub async fn reset(&self) -> Result<(), EngineError> {
    let inner = &self.inner;
    let removed = inner
      .writer
      .wipe(&inner.ledger, |previous| {
        let mut fresh = QuotaLedger::new(inner.clock.current_day_id(), &inner.config);
        fresh.continue_from(previous);
        fresh
      })
      .await?;
    tracing::info!("Session reset, removed {} records", removed);
    Ok(())
  }

  /// Stop background tasks and write the final snapshot
  pub async fn shutdown(&self) -> Result<(), StoreError> {
    {
      let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
      for task in tasks.drain(..) {
        task.abort();
      }
    }
    self.flush().await?;
    tracing::info!("Session engine stopped");
    Ok(())
  }
}

fn spawn_writer<S, C, A>(inner: &Arc<EngineInner<S, C, A>>) -> JoinHandle<()>
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  let weak: Weak<EngineInner<S, C, A>> = Arc::downgrade(inner);
  let wake = inner.writer.wake_handle();
  tokio::spawn(async move {
    loop {
      wake.notified().await;
      let Some(inner) = weak.upgrade() else { break };
      inner.persist().await;
    }
  })
}

fn spawn_ticker<S, C, A>(inner: &Arc<EngineInner<S, C, A>>) -> JoinHandle<()>
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  let weak: Weak<EngineInner<S, C, A>> = Arc::downgrade(inner);
  let period = inner.config.rollover_interval;
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately; start already checked
    interval.tick().await;
    loop {
      interval.tick().await;
      let Some(inner) = weak.upgrade() else { break };
      inner.check_rollover();
    }
  })
}
