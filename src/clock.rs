//! Calendar-day identity used as the rollover boundary.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// A calendar date in local time, rendered as `YYYY-MM-DD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayId(NaiveDate);

impl DayId {
  pub fn new(date: NaiveDate) -> Self {
    Self(date)
  }

  pub fn parse(s: &str) -> Option<Self> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok().map(Self)
  }

  pub fn date(&self) -> NaiveDate {
    self.0
  }
}

impl std::fmt::Display for DayId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0.format("%Y-%m-%d"))
  }
}

/// Source of "today". Implementations must be pure functions of wall-clock time.
pub trait DayClock: Send + Sync + 'static {
  fn current_day_id(&self) -> DayId;

  fn is_stale(&self, last_day_id: &DayId) -> bool {
    *last_day_id != self.current_day_id()
  }
}

/// Wall clock truncated to the local calendar day
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDayClock;

impl DayClock for SystemDayClock {
  fn current_day_id(&self) -> DayId {
    DayId(Local::now().date_naive())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_day_id_display_and_parse() {
    let day = DayId::parse("2024-05-01").unwrap();
    assert_eq!(day.to_string(), "2024-05-01");
    assert_eq!(DayId::parse(" 2024-05-01\n"), Some(day));
  }

  #[test]
  fn test_day_id_rejects_garbage() {
    assert_eq!(DayId::parse("Wed May 01 2024"), None);
    assert_eq!(DayId::parse(""), None);
  }

  #[test]
  fn test_day_id_serializes_as_date_string() {
    let day = DayId::parse("2024-05-02").unwrap();
    assert_eq!(serde_json::to_string(&day).unwrap(), "\"2024-05-02\"");
    let back: DayId = serde_json::from_str("\"2024-05-02\"").unwrap();
    assert_eq!(back, day);
  }

  #[test]
  fn test_system_clock_is_not_stale_against_itself() {
    let clock = SystemDayClock;
    let today = clock.current_day_id();
    assert_eq!(today.date(), Local::now().date_naive());
    assert!(!clock.is_stale(&today));
  }

  #[test]
  fn test_yesterday_is_stale() {
    let clock = SystemDayClock;
    let yesterday = DayId::new(clock.current_day_id().date().pred_opt().unwrap());
    assert!(clock.is_stale(&yesterday));
  }
}
