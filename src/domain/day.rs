use serde::{Deserialize, Serialize};

use super::ChallengeId;
use crate::clock::DayId;

/// Day-scoped progress. Reset to all-zero on rollover.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySnapshot {
  pub completed_today: bool,
  pub active_challenge: Option<ChallengeId>,
  pub skips_used_today: u32,
  pub swipes_used_today: u32,
  pub challenges_taken_today: u32,
}

/// Where the user is within the current day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPhase {
  Fresh,
  InProgress,
  Completed,
}

impl DaySnapshot {
  pub fn phase(&self) -> DayPhase {
    if self.completed_today {
      DayPhase::Completed
    } else if self.active_challenge.is_some() || self.challenges_taken_today > 0 {
      DayPhase::InProgress
    } else {
      DayPhase::Fresh
    }
  }
}

/// Long-lived profile counters. Streak and completed count mirror the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
  pub streak: u32,
  pub completed_count: u32,
  pub is_premium: bool,
  pub last_completed_date: Option<DayId>,
  /// Last values the server confirmed; unconfirmed commits stay within +1 of these
  pub server_streak: u32,
  pub server_completed_count: u32,
}

impl UserProfile {
  /// Overwrite counters with server-authoritative values
  pub fn reconcile(&mut self, streak: u32, completed_count: u32) {
    self.streak = streak;
    self.completed_count = completed_count;
    self.server_streak = streak;
    self.server_completed_count = completed_count;
  }

  /// Advance counters by one without server confirmation, bounded by the
  /// last confirmed values
  pub fn advance_unconfirmed(&mut self) {
    self.streak = self.streak.saturating_add(1).min(self.server_streak.saturating_add(1));
    self.completed_count = self
      .completed_count
      .saturating_add(1)
      .min(self.server_completed_count.saturating_add(1));
  }
}
