//! Application configuration constants.
//!
//! Product quotas live here as constants; deployment settings (remote API,
//! local server port, rollover cadence) are loaded from `config.toml`, then
//! the environment, then defaults.

use serde::Deserialize;
use std::time::Duration;

// ==================== Quota Configuration ====================

/// Swipes a free user may make per day
pub const FREE_MAX_SWIPES_PER_DAY: u32 = 15;

/// Skips a free user may make per day
pub const FREE_MAX_SKIPS_PER_DAY: u32 = 5;

/// Challenges a free user may take on per day (per attempt, skips do not refund)
pub const FREE_MAX_CHALLENGES_PER_DAY: u32 = 5;

/// Favorites a free user may keep
pub const FREE_MAX_FAVORITES: usize = 10;

/// Ceiling used for premium quotas. Counters stay total instead of unbounded.
pub const PREMIUM_CEILING: u32 = u32::MAX;

/// Number of viewed challenge ids kept across days
pub const VIEWED_HISTORY_LIMIT: usize = 500;

// ==================== Engine Configuration ====================

/// How often the engine checks for a day change while running
pub const ROLLOVER_CHECK_INTERVAL_SECS: u64 = 60;

/// Per-tier ceilings applied by the quota ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
  pub max_swipes: u32,
  pub max_skips: u32,
  pub max_challenges: u32,
  pub max_favorites: usize,
  /// When false, taking a new challenge is always allowed
  pub enforce_challenge_quota: bool,
}

impl Limits {
  pub const FREE: Limits = Limits {
    max_swipes: FREE_MAX_SWIPES_PER_DAY,
    max_skips: FREE_MAX_SKIPS_PER_DAY,
    max_challenges: FREE_MAX_CHALLENGES_PER_DAY,
    max_favorites: FREE_MAX_FAVORITES,
    enforce_challenge_quota: true,
  };

  pub const PREMIUM: Limits = Limits {
    max_swipes: PREMIUM_CEILING,
    max_skips: PREMIUM_CEILING,
    max_challenges: PREMIUM_CEILING,
    max_favorites: usize::MAX,
    enforce_challenge_quota: false,
  };
}

/// Tunables for a running session engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub free: Limits,
  pub premium: Limits,
  pub rollover_interval: Duration,
  pub viewed_history_limit: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      free: Limits::FREE,
      premium: Limits::PREMIUM,
      rollover_interval: Duration::from_secs(ROLLOVER_CHECK_INTERVAL_SECS),
      viewed_history_limit: VIEWED_HISTORY_LIMIT,
    }
  }
}

// ==================== File Configuration ====================

/// Configuration file structure for config.toml
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
  remote: Option<RemoteSection>,
  server: Option<ServerSection>,
  engine: Option<EngineSection>,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteSection {
  base_url: Option<String>,
  token: Option<String>,
  timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
  port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct EngineSection {
  rollover_interval_secs: Option<u64>,
}

/// Error raised when config.toml exists but cannot be used
#[derive(Debug)]
pub enum ConfigError {
  Io(String),
  Parse(String),
}

impl std::fmt::Display for ConfigError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ConfigError::Io(err) => write!(f, "Could not read config.toml: {}", err),
      ConfigError::Parse(err) => write!(f, "Invalid config.toml: {}", err),
    }
  }
}

impl std::error::Error for ConfigError {}

// ==================== Server Configuration ====================

/// Server address to bind to (loopback only, the UI shell runs on-device)
pub const SERVER_ADDR: &str = "127.0.0.1";

/// Default server port
pub const SERVER_PORT: u16 = 3000;

/// Default remote API base URL
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Default timeout for remote calls
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 15;

/// Remote challenge service settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
  pub base_url: String,
  pub token: Option<String>,
  pub timeout: Duration,
}

/// Fully resolved runtime settings
#[derive(Debug, Clone)]
pub struct AppSettings {
  pub remote: RemoteSettings,
  pub port: u16,
  pub engine: EngineConfig,
}

impl AppSettings {
  /// Get the full server bind address
  pub fn bind_addr(&self) -> String {
    format!("{}:{}", SERVER_ADDR, self.port)
  }
}

/// Load settings with priority: config.toml > .env / environment > default
pub fn load_settings() -> Result<AppSettings, ConfigError> {
  // Load .env file if present
  let _ = dotenvy::dotenv();

  let file = match std::fs::read_to_string("config.toml") {
    Ok(contents) => parse_file_config(&contents)?,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
    Err(e) => return Err(ConfigError::Io(e.to_string())),
  };

  Ok(resolve(file, |key| std::env::var(key).ok()))
}

fn parse_file_config(contents: &str) -> Result<FileConfig, ConfigError> {
  toml::from_str::<FileConfig>(contents).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> AppSettings {
  let remote = file.remote.unwrap_or_default();
  let server = file.server.unwrap_or_default();
  let engine = file.engine.unwrap_or_default();

  let base_url = match remote.base_url {
    Some(url) => {
      tracing::info!("Using API base URL from config.toml: {}", url);
      url
    }
    None => match env("API_BASE_URL") {
      Some(url) => {
        tracing::info!("Using API base URL from API_BASE_URL env: {}", url);
        url
      }
      None => DEFAULT_API_BASE_URL.to_string(),
    },
  };

  let token = remote.token.or_else(|| env("API_TOKEN")).filter(|t| !t.is_empty());

  let port = server
    .port
    .or_else(|| env("PORT").and_then(|p| p.parse().ok()))
    .unwrap_or(SERVER_PORT);

  let mut engine_config = EngineConfig::default();
  if let Some(secs) = engine.rollover_interval_secs.filter(|s| *s > 0) {
    engine_config.rollover_interval = Duration::from_secs(secs);
  }

  AppSettings {
    remote: RemoteSettings {
      base_url: base_url.trim_end_matches('/').to_string(),
      token,
      timeout: Duration::from_secs(remote.timeout_secs.unwrap_or(DEFAULT_API_TIMEOUT_SECS)),
    },
    port,
    engine: engine_config,
  }
}
