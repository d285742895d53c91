//! Remote challenge service contract.
//!
//! Only the completion reconciler talks to the server. The server is the
//! sole arbiter of the one-completion-per-day rule.

pub mod http;

use serde::{Deserialize, Deserializer, Serialize};
use std::future::Future;

use crate::domain::ChallengeId;

pub use http::HttpChallengeApi;

/// Calls the engine makes against the challenge service
pub trait ChallengeApi: Send + Sync + 'static {
  /// `POST /challenges/{id}/complete`
  fn complete_challenge(&self, id: ChallengeId) -> impl Future<Output = Result<(), RemoteError>> + Send;

  /// `GET /profile/stats`
  fn fetch_stats(&self) -> impl Future<Output = Result<ProfileStats, RemoteError>> + Send;
}

/// Authoritative profile counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStats {
  pub streak: u32,
  pub total_completed: u32,
  #[serde(default)]
  pub daily_stats: Vec<DailyStat>,
}

/// Completions recorded by the server for one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStat {
  pub date: String,
  #[serde(deserialize_with = "count_or_flag")]
  pub completed: u32,
}

/// Some server versions report `completed` as a flag rather than a count
fn count_or_flag<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Completed {
    Count(u32),
    Flag(bool),
  }

  Ok(match Completed::deserialize(deserializer)? {
    Completed::Count(n) => n,
    Completed::Flag(done) => u32::from(done),
  })
}

/// Failures talking to the challenge service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
  /// The server already recorded a completion for today
  LimitReached,
  Http { status: u16, message: String },
  Transport(String),
  Decode(String),
}

impl std::fmt::Display for RemoteError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RemoteError::LimitReached => write!(f, "Daily completion limit already reached"),
      RemoteError::Http { status, message } => write!(f, "HTTP {}: {}", status, message),
      RemoteError::Transport(err) => write!(f, "Transport error: {}", err),
      RemoteError::Decode(err) => write!(f, "Could not decode response: {}", err),
    }
  }
}

impl std::error::Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      RemoteError::Decode(err.to_string())
    } else {
      RemoteError::Transport(err.to_string())
    }
  }
}
