//! Completion reconciler.
//!
//! Turns "the user finished challenge X" into a server-confirmed fact:
//!
//! 1. The caller takes a [`CompletionTicket`] from the ledger.
//! 2. `POST /challenges/{id}/complete`.
//! 3. `GET /profile/stats` for the authoritative streak and total.
//! 4. Commit with the server's counters.
//!
//! If step 2 fails the ticket is rolled back. Once step 2 has succeeded the
//! ticket is always committed: a failed stats call commits with counters
//! advanced by one over the last confirmed values instead of rolling back a
//! completion the server already holds.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::{ChallengeId, UserProfile};
use crate::ledger::{CompletionTicket, DenyReason, Outcome, QuotaLedger};
use crate::remote::{ChallengeApi, ProfileStats, RemoteError};

/// Terminal transitions the reconciler drives. Each ticket is consumed by
/// exactly one of them.
pub trait CompletionLedger: Send + Sync {
  fn commit_completion(&self, ticket: CompletionTicket, stats: ProfileStats) -> Result<UserProfile, DenyReason>;

  fn commit_unconfirmed(&self, ticket: CompletionTicket) -> Result<UserProfile, DenyReason>;

  fn rollback_completion(&self, ticket: CompletionTicket) -> Outcome;
}

impl CompletionLedger for Mutex<QuotaLedger> {
  fn commit_completion(&self, ticket: CompletionTicket, stats: ProfileStats) -> Result<UserProfile, DenyReason> {
    let mut ledger = self.lock().unwrap_or_else(PoisonError::into_inner);
    match ledger.commit_completion(ticket, stats.streak, stats.total_completed) {
      Outcome::Applied => {
        ledger.set_daily_stats(stats.daily_stats);
        Ok(ledger.profile().clone())
      }
      Outcome::Denied(reason) => Err(reason),
    }
  }

  fn commit_unconfirmed(&self, ticket: CompletionTicket) -> Result<UserProfile, DenyReason> {
    let mut ledger = self.lock().unwrap_or_else(PoisonError::into_inner);
    match ledger.commit_unconfirmed(ticket) {
      Outcome::Applied => Ok(ledger.profile().clone()),
      Outcome::Denied(reason) => Err(reason),
    }
  }

  fn rollback_completion(&self, ticket: CompletionTicket) -> Outcome {
    self.lock()
      .unwrap_or_else(PoisonError::into_inner)
      .rollback_completion(ticket)
  }
}

/// What the user sees after a successful completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReceipt {
  pub challenge_id: ChallengeId,
  pub streak: u32,
  pub completed_count: u32,
  /// False when the counters are a local estimate pending the next stats read
  pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
  /// The server already holds a completion for today
  DailyLimitExceeded,
  /// Network or storage trouble; the user may retry
  TransientFailure(String),
  /// Caller bug, e.g. completing with no active challenge
  InvariantViolation(&'static str),
  /// Another completion is still waiting on the server
  Pending,
}

impl std::fmt::Display for CompletionError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CompletionError::DailyLimitExceeded => write!(f, "Today's challenge is already completed"),
      CompletionError::TransientFailure(err) => write!(f, "Could not complete challenge: {}", err),
      CompletionError::InvariantViolation(what) => write!(f, "Invariant violation: {}", what),
      CompletionError::Pending => write!(f, "A completion is already in progress"),
    }
  }
}

impl std::error::Error for CompletionError {}

impl From<DenyReason> for CompletionError {
  fn from(reason: DenyReason) -> Self {
    match reason {
      DenyReason::InvariantViolation(what) => CompletionError::InvariantViolation(what),
      DenyReason::CompletionPending => CompletionError::Pending,
      DenyReason::AlreadyCompletedToday => CompletionError::DailyLimitExceeded,
      other => CompletionError::TransientFailure(format!("{:?}", other)),
    }
  }
}

impl From<RemoteError> for CompletionError {
  fn from(err: RemoteError) -> Self {
    match err {
      RemoteError::LimitReached => CompletionError::DailyLimitExceeded,
      other => CompletionError::TransientFailure(other.to_string()),
    }
  }
}

pub struct CompletionReconciler<A> {
  api: Arc<A>,
}

impl<A: ChallengeApi> CompletionReconciler<A> {
  pub fn new(api: Arc<A>) -> Self {
    Self { api }
  }

  /// Drive `ticket` to commit or rollback. Never retries.
  pub async fn run<L: CompletionLedger>(
    &self,
    ledger: &L,
    ticket: CompletionTicket,
  ) -> Result<CompletionReceipt, CompletionError> {
    let challenge_id = ticket.challenge_id();

    if let Err(err) = self.api.complete_challenge(challenge_id).await {
      tracing::warn!("Completion of challenge {} rejected, rolling back: {}", challenge_id, err);
      ledger.rollback_completion(ticket);
      return Err(err.into());
    }

    let (profile, confirmed) = match self.api.fetch_stats().await {
      Ok(stats) => (ledger.commit_completion(ticket, stats)?, true),
      Err(err) => {
        tracing::warn!(
          "Challenge {} completed but stats unavailable, committing unconfirmed: {}",
          challenge_id,
          err
        );
        (ledger.commit_unconfirmed(ticket)?, false)
      }
    };

    tracing::info!(
      "Challenge {} completed (streak {}, total {}, confirmed {})",
      challenge_id,
      profile.streak,
      profile.completed_count,
      confirmed
    );
    Ok(CompletionReceipt {
      challenge_id,
      streak: profile.streak,
      completed_count: profile.completed_count,
      confirmed,
    })
  }
}
