//! Day-scoped quota ledger.
//!
//! Holds the day snapshot, the profile and the challenge collections, and
//! applies admission-checked transitions. Admission checks are pure
//! predicates evaluated before any mutation; a denied call leaves the
//! ledger untouched.
//!
//! Every applied change bumps `generation`, which the engine uses to decide
//! whether a snapshot write is due.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::clock::{DayClock, DayId};
use crate::config::{EngineConfig, Limits};
use crate::domain::{Challenge, ChallengeId, DayPhase, DaySnapshot, UserProfile};
use crate::remote::DailyStat;
use crate::store::{AppData, LoadedState, PersistedState};

/// Actions with a per-day or per-account ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quota {
  Swipes,
  Skips,
  Challenges,
  Favorites,
}

/// Why a mutation was declined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
  QuotaExceeded(Quota),
  /// Free users get one accepted completion per day
  AlreadyCompletedToday,
  /// A different challenge is already active; skip it first
  ChallengeAlreadyActive,
  NoActiveChallenge,
  /// A completion is waiting on the server
  CompletionPending,
  /// Caller bug. Never user-visible.
  InvariantViolation(&'static str),
}

/// Result of a mutation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
  Applied,
  Denied(DenyReason),
}

impl Outcome {
  pub fn is_applied(&self) -> bool {
    matches!(self, Outcome::Applied)
  }
}

/// Record a programmer error: fatal in debug builds, a logged denial in release
pub(crate) fn invariant_violation(what: &'static str) -> DenyReason {
  debug_assert!(false, "invariant violation: {}", what);
  tracing::error!("Invariant violation: {}", what);
  DenyReason::InvariantViolation(what)
}

/// Proof that a completion is in flight. Consumed by exactly one of
/// `commit_completion`, `commit_unconfirmed` or `rollback_completion`.
#[derive(Debug)]
#[must_use = "a completion ticket must be committed or rolled back"]
pub struct CompletionTicket {
  seq: u64,
  challenge_id: ChallengeId,
  day: DayId,
  before: DaySnapshot,
}

impl CompletionTicket {
  pub fn seq(&self) -> u64 {
    self.seq
  }

  pub fn challenge_id(&self) -> ChallengeId {
    self.challenge_id
  }

  pub fn day(&self) -> DayId {
    self.day
  }
}

/// What `rollover_if_stale` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollover {
  Unchanged,
  RolledOver { from: DayId, to: DayId },
  /// Day changed but a completion is pending; retry on the next check
  Deferred,
}

#[derive(Debug, Clone)]
pub struct QuotaLedger {
  day: DaySnapshot,
  profile: UserProfile,
  /// Insertion-ordered, unique, capped at `viewed_limit`
  viewed: Vec<ChallengeId>,
  selected: BTreeSet<ChallengeId>,
  favorites: Vec<Challenge>,
  last_day: DayId,
  daily_stats: Vec<DailyStat>,
  free: Limits,
  premium: Limits,
  viewed_limit: usize,
  pending: Option<u64>,
  next_ticket: u64,
  generation: u64,
}

impl QuotaLedger {
  /// All-zero ledger valid for `today`
  pub fn new(today: DayId, config: &EngineConfig) -> Self {
    Self {
      day: DaySnapshot::default(),
      profile: UserProfile::default(),
      viewed: Vec::new(),
      selected: BTreeSet::new(),
      favorites: Vec::new(),
      last_day: today,
      daily_stats: Vec::new(),
      free: config.free,
      premium: config.premium,
      viewed_limit: config.viewed_history_limit.max(1),
      pending: None,
      next_ticket: 1,
      generation: 0,
    }
  }

  /// Rebuild from persisted records. A missing day marker is treated as
  /// stale so the first rollover check resets the day.
  pub fn from_loaded(loaded: LoadedState, today: DayId, config: &EngineConfig) -> Self {
    let mut ledger = Self::new(today, config);
    let app = loaded.app_data;

    ledger.last_day = loaded.last_day.unwrap_or_else(|| {
      DayId::new(today.date().pred_opt().unwrap_or(today.date()))
    });
    ledger.day = DaySnapshot {
      completed_today: app.completed_today,
      // completion clears the active slot
      active_challenge: if app.completed_today { None } else { app.active_challenge },
      skips_used_today: app.skips_used_today,
      swipes_used_today: app.swipes_used_today,
      challenges_taken_today: app.challenges_taken_today,
    };
    ledger.profile = UserProfile {
      streak: app.streak,
      completed_count: app.completed_count,
      is_premium: app.is_premium,
      last_completed_date: app.last_completed_date,
      server_streak: app.server_streak.unwrap_or(app.streak),
      server_completed_count: app.server_completed_count.unwrap_or(app.completed_count),
    };

    for challenge in app.favorites {
      if !ledger.favorites.iter().any(|f| f.id == challenge.id) {
        ledger.favorites.push(challenge);
      }
    }
    for id in loaded.viewed {
      ledger.push_viewed(id);
    }
    for id in loaded.selected {
      ledger.push_viewed(id);
      ledger.selected.insert(id);
    }
    ledger
  }

  /// Carry the change and ticket counters over from a ledger this one
  /// replaces, so its first state sorts after everything `previous` wrote.
  pub fn continue_from(&mut self, previous: &QuotaLedger) {
    self.generation = previous.generation + 1;
    self.next_ticket = previous.next_ticket;
  }

  /// Full persisted form of the current state
  pub fn to_persisted(&self) -> PersistedState {
    PersistedState {
      last_day: self.last_day,
      app_data: AppData {
        streak: self.profile.streak,
        completed_count: self.profile.completed_count,
        completed_today: self.day.completed_today,
        is_premium: self.profile.is_premium,
        skips_used_today: self.day.skips_used_today,
        swipes_used_today: self.day.swipes_used_today,
        favorites: self.favorites.clone(),
        active_challenge: self.day.active_challenge,
        challenges_taken_today: self.day.challenges_taken_today,
        last_completed_date: self.profile.last_completed_date,
        server_streak: Some(self.profile.server_streak),
        server_completed_count: Some(self.profile.server_completed_count),
      },
      viewed: self.viewed.clone(),
      selected: self.selected.iter().copied().collect(),
    }
  }

  // ==================== Accessors ====================

  pub fn day(&self) -> &DaySnapshot {
    &self.day
  }

  pub fn phase(&self) -> DayPhase {
    self.day.phase()
  }

  pub fn profile(&self) -> &UserProfile {
    &self.profile
  }

  pub fn viewed(&self) -> &[ChallengeId] {
    &self.viewed
  }

  pub fn selected(&self) -> &BTreeSet<ChallengeId> {
    &self.selected
  }

  pub fn favorites(&self) -> &[Challenge] {
    &self.favorites
  }

  pub fn last_day(&self) -> DayId {
    self.last_day
  }

  pub fn daily_stats(&self) -> &[DailyStat] {
    &self.daily_stats
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn completion_pending(&self) -> bool {
    self.pending.is_some()
  }

  pub fn limits(&self) -> Limits {
    if self.profile.is_premium { self.premium } else { self.free }
  }

  pub fn is_viewed(&self, id: ChallengeId) -> bool {
    self.viewed.contains(&id)
  }

  pub fn is_favorite(&self, id: ChallengeId) -> bool {
    self.favorites.iter().any(|f| f.id == id)
  }

  fn touch(&mut self) {
    self.generation += 1;
  }

  fn guard_pending(&self) -> Result<(), DenyReason> {
    if self.pending.is_some() {
      Err(DenyReason::CompletionPending)
    } else {
      Ok(())
    }
  }

  // ==================== Swipes ====================

  pub fn can_swipe(&self) -> bool {
    self.day.swipes_used_today < self.limits().max_swipes
  }

  pub fn record_swipe(&mut self) -> Outcome {
    if let Err(reason) = self.guard_pending() {
      return Outcome::Denied(reason);
    }
    if !self.can_swipe() {
      return Outcome::Denied(DenyReason::QuotaExceeded(Quota::Swipes));
    }
    self.day.swipes_used_today += 1;
    self.touch();
    Outcome::Applied
  }

  // ==================== Skips ====================

  pub fn can_skip(&self) -> bool {
    self.day.skips_used_today < self.limits().max_skips
  }

  /// Drop the active challenge. Skips never refund the challenge quota.
  pub fn record_skip(&mut self) -> Outcome {
    if let Err(reason) = self.guard_pending() {
      return Outcome::Denied(reason);
    }
    if self.day.active_challenge.is_none() {
      return Outcome::Denied(DenyReason::NoActiveChallenge);
    }
    if !self.can_skip() {
      return Outcome::Denied(DenyReason::QuotaExceeded(Quota::Skips));
    }
    self.day.active_challenge = None;
    self.day.skips_used_today += 1;
    self.touch();
    Outcome::Applied
  }

  // ==================== Challenge selection ====================

  pub fn can_take_new_challenge(&self) -> bool {
    self.take_denial().is_none()
  }

  fn take_denial(&self) -> Option<DenyReason> {
    let limits = self.limits();
    if !limits.enforce_challenge_quota {
      return None;
    }
    if self.day.completed_today {
      Some(DenyReason::AlreadyCompletedToday)
    } else if self.day.challenges_taken_today >= limits.max_challenges {
      Some(DenyReason::QuotaExceeded(Quota::Challenges))
    } else {
      None
    }
  }

  /// Commit to a challenge (`Some`) or clear the slot (`None`). Each new
  /// commitment counts against the daily quota; clearing never does.
  pub fn set_active_challenge(&mut self, id: Option<ChallengeId>) -> Outcome {
    if let Err(reason) = self.guard_pending() {
      return Outcome::Denied(reason);
    }
    let Some(id) = id else {
      if self.day.active_challenge.take().is_some() {
        self.touch();
      }
      return Outcome::Applied;
    };

    match self.day.active_challenge {
      Some(current) if current == id => return Outcome::Applied,
      Some(_) => return Outcome::Denied(DenyReason::ChallengeAlreadyActive),
      None => {}
    }
    if let Some(reason) = self.take_denial() {
      return Outcome::Denied(reason);
    }

    self.day.active_challenge = Some(id);
    self.day.challenges_taken_today = self.day.challenges_taken_today.saturating_add(1);
    self.touch();
    Outcome::Applied
  }

  // ==================== Viewed / selected ====================

  fn push_viewed(&mut self, id: ChallengeId) -> bool {
    if self.viewed.contains(&id) {
      return false;
    }
    self.viewed.push(id);
    while self.viewed.len() > self.viewed_limit {
      // Oldest id that is not selected; selected ids must stay viewed
      match self.viewed.iter().position(|v| !self.selected.contains(v) && *v != id) {
        Some(idx) => {
          self.viewed.remove(idx);
        }
        None => break,
      }
    }
    true
  }

  pub fn mark_viewed(&mut self, id: ChallengeId) -> Outcome {
    if self.push_viewed(id) {
      self.touch();
    }
    Outcome::Applied
  }

  /// Unviewed ids are marked viewed first, so a challenge is always seen
  /// before it is chosen.
  pub fn mark_selected(&mut self, id: ChallengeId) -> Outcome {
    let mut changed = false;
    if self.push_viewed(id) {
      tracing::debug!("Challenge {} selected before being viewed, marking viewed", id);
      changed = true;
    }
    changed |= self.selected.insert(id);
    if changed {
      self.touch();
    }
    Outcome::Applied
  }

  // ==================== Favorites ====================

  pub fn add_favorite(&mut self, challenge: Challenge) -> Outcome {
    if self.is_favorite(challenge.id) {
      return Outcome::Applied;
    }
    if self.favorites.len() >= self.limits().max_favorites {
      return Outcome::Denied(DenyReason::QuotaExceeded(Quota::Favorites));
    }
    self.favorites.push(challenge);
    self.touch();
    Outcome::Applied
  }

  pub fn remove_favorite(&mut self, id: ChallengeId) -> Outcome {
    let before = self.favorites.len();
    self.favorites.retain(|f| f.id != id);
    if self.favorites.len() != before {
      self.touch();
    }
    Outcome::Applied
  }

  // ==================== Profile ====================

  /// Entitlement change reported by the account collaborator
  pub fn set_premium(&mut self, is_premium: bool) -> Outcome {
    if self.profile.is_premium != is_premium {
      self.profile.is_premium = is_premium;
      self.touch();
    }
    Outcome::Applied
  }

  // ==================== Completion ====================

  /// Capture the pre-completion snapshot. Nothing is mutated yet.
  pub fn begin_completion(&mut self) -> Result<CompletionTicket, DenyReason> {
    self.guard_pending()?;
    let Some(challenge_id) = self.day.active_challenge else {
      return Err(invariant_violation("completion requested with no active challenge"));
    };

    let seq = self.next_ticket;
    self.next_ticket += 1;
    self.pending = Some(seq);
    Ok(CompletionTicket {
      seq,
      challenge_id,
      day: self.last_day,
      before: self.day.clone(),
    })
  }

  fn settle(&mut self, ticket: &CompletionTicket) -> Result<(), DenyReason> {
    if self.pending != Some(ticket.seq) {
      return Err(invariant_violation("completion ticket is not the pending one"));
    }
    self.pending = None;
    Ok(())
  }

  fn apply_completion(&mut self, id: ChallengeId) {
    self.day.completed_today = true;
    self.day.active_challenge = None;
    self.selected.remove(&id);
    self.push_viewed(id);
    self.profile.last_completed_date = Some(self.last_day);
  }

  /// Server accepted the completion and reported authoritative counters
  pub fn commit_completion(
    &mut self,
    ticket: CompletionTicket,
    server_streak: u32,
    server_total_completed: u32,
  ) -> Outcome {
    if let Err(reason) = self.settle(&ticket) {
      return Outcome::Denied(reason);
    }
    self.apply_completion(ticket.challenge_id);
    self.profile.reconcile(server_streak, server_total_completed);
    self.touch();
    Outcome::Applied
  }

  /// Server accepted the completion but its counters could not be read.
  /// Counters advance by one over the last confirmed server values.
  pub fn commit_unconfirmed(&mut self, ticket: CompletionTicket) -> Outcome {
    if let Err(reason) = self.settle(&ticket) {
      return Outcome::Denied(reason);
    }
    self.apply_completion(ticket.challenge_id);
    self.profile.advance_unconfirmed();
    self.touch();
    Outcome::Applied
  }

  /// Restore the day snapshot captured at `begin_completion`. The profile
  /// is untouched.
  pub fn rollback_completion(&mut self, ticket: CompletionTicket) -> Outcome {
    if let Err(reason) = self.settle(&ticket) {
      return Outcome::Denied(reason);
    }
    if self.day != ticket.before {
      self.day = ticket.before;
      self.touch();
    }
    Outcome::Applied
  }

  pub fn set_daily_stats(&mut self, stats: Vec<DailyStat>) {
    self.daily_stats = stats;
  }

  // ==================== Rollover ====================

  /// Reset the day if the clock moved past `last_day`. Favorites and the
  /// viewed history survive; the selected set does not.
  pub fn rollover_if_stale(&mut self, clock: &impl DayClock) -> Rollover {
    if !clock.is_stale(&self.last_day) {
      return Rollover::Unchanged;
    }
    if self.pending.is_some() {
      return Rollover::Deferred;
    }

    let from = self.last_day;
    let to = clock.current_day_id();
    self.day = DaySnapshot::default();
    self.selected.clear();
    self.last_day = to;
    self.touch();
    Rollover::RolledOver { from, to }
  }
}
