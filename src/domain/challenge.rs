use serde::{Deserialize, Serialize};

/// Server-assigned challenge identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChallengeId(pub u64);

impl std::fmt::Display for ChallengeId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<u64> for ChallengeId {
  fn from(id: u64) -> Self {
    Self(id)
  }
}

/// Committed direction reported by the gesture recognizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
  Left,
  Right,
}

impl SwipeDirection {
  pub fn from_str(s: &str) -> Option<Self> {
    match s {
      "left" | "Left" => Some(Self::Left),
      "right" | "Right" => Some(Self::Right),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Left => "left",
      Self::Right => "right",
    }
  }
}

/// A challenge record as served by the catalog. Favorites keep the whole
/// record so they render offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
  pub id: ChallengeId,
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub difficulty: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration_minutes: Option<u32>,
}

impl Challenge {
  pub fn new(id: u64, title: impl Into<String>) -> Self {
    Self {
      id: ChallengeId(id),
      title: title.into(),
      description: String::new(),
      category: None,
      difficulty: None,
      duration_minutes: None,
    }
  }
}
