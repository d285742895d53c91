//! Persisted record shapes and snapshot load/write.
//!
//! Records are versionless JSON. Missing fields load as defaults so records
//! written by older builds keep working.

use serde::{Deserialize, Deserializer, Serialize};

use super::{KeyValueStore, LogOnError, StorageKeys, StoreError};
use crate::clock::DayId;
use crate::domain::{Challenge, ChallengeId};

/// The `appData` record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppData {
  pub streak: u32,
  pub completed_count: u32,
  pub completed_today: bool,
  pub is_premium: bool,
  pub skips_used_today: u32,
  pub swipes_used_today: u32,
  pub favorites: Vec<Challenge>,
  #[serde(deserialize_with = "id_or_record")]
  pub active_challenge: Option<ChallengeId>,
  pub challenges_taken_today: u32,
  pub last_completed_date: Option<DayId>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub server_streak: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub server_completed_count: Option<u32>,
}

/// Accept either a bare id or a full challenge object for `activeChallenge`
fn id_or_record<'de, D>(deserializer: D) -> Result<Option<ChallengeId>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Active {
    Id(ChallengeId),
    Record { id: ChallengeId },
  }

  Ok(Option::<Active>::deserialize(deserializer)?.map(|active| match active {
    Active::Id(id) | Active::Record { id } => id,
  }))
}

/// Everything the engine persists, always written as a whole
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
  pub last_day: DayId,
  pub app_data: AppData,
  pub viewed: Vec<ChallengeId>,
  pub selected: Vec<ChallengeId>,
}

/// Result of reading the engine's records at startup
#[derive(Debug, Clone, Default)]
pub struct LoadedState {
  pub last_day: Option<DayId>,
  pub app_data: AppData,
  pub viewed: Vec<ChallengeId>,
  pub selected: Vec<ChallengeId>,
  /// No engine-owned key existed in the store
  pub first_run: bool,
}

fn decode<T: for<'de> Deserialize<'de> + Default>(key: &str, raw: Option<String>) -> T {
  match raw {
    Some(raw) => serde_json::from_str(&raw)
      .log_warn_default(&format!("Corrupt record '{}', using defaults", key)),
    None => T::default(),
  }
}

/// Load all records. Read failures propagate; corrupt records fall back to defaults.
pub async fn load_state<S: KeyValueStore>(store: &S, keys: &StorageKeys) -> Result<LoadedState, StoreError> {
  let first_run = !store.list_keys().await?.iter().any(|k| keys.owns(k));

  let last_day = match store.get(&keys.last_day()).await? {
    Some(raw) => {
      // Older builds stored the bare string, newer ones a JSON string
      let day = serde_json::from_str::<String>(&raw).unwrap_or(raw);
      let parsed = DayId::parse(&day);
      if parsed.is_none() {
        tracing::warn!("Unreadable {} '{}', treating as stale", StorageKeys::LAST_DAY, day);
      }
      parsed
    }
    None => None,
  };

  let app_data = decode(StorageKeys::APP_DATA, store.get(&keys.app_data()).await?);
  let viewed = decode(StorageKeys::VIEWED, store.get(&keys.viewed()).await?);
  let selected = decode(StorageKeys::SELECTED, store.get(&keys.selected()).await?);

  Ok(LoadedState {
    last_day,
    app_data,
    viewed,
    selected,
    first_run,
  })
}

/// Write a full snapshot. The day marker goes last: a crash part-way through
/// can only leave an old marker over fresh counters (a harmless second
/// rollover), never a new marker over stale counters.
pub async fn write_state<S: KeyValueStore>(
  store: &S,
  keys: &StorageKeys,
  state: &PersistedState,
) -> Result<(), StoreError> {
  let app_data = serde_json::to_string(&state.app_data)?;
  let viewed = serde_json::to_string(&state.viewed)?;
  let selected = serde_json::to_string(&state.selected)?;

  store.set(&keys.app_data(), &app_data).await?;
  store.set(&keys.viewed(), &viewed).await?;
  store.set(&keys.selected(), &selected).await?;
  store.set(&keys.last_day(), &state.last_day.to_string()).await?;
  Ok(())
}

/// Remove every engine-owned record, leaving other subsystems' keys alone
pub async fn clear_state<S: KeyValueStore>(store: &S, keys: &StorageKeys) -> Result<usize, StoreError> {
  let owned: Vec<String> = store
    .list_keys()
    .await?
    .into_iter()
    .filter(|k| keys.owns(k))
    .collect();
  store.remove_many(&owned).await?;
  Ok(owned.len())
}
