//! Project path functions - single source of truth for all file paths.
//!
//! ## Environment Variables
//!
//! - `DATA_DIR`: Override the base data directory (default: "data")
//! - `PORT`: Override the local API port (see config.rs)
//!
//! This allows running several isolated engines side by side, e.g. one per
//! test device profile:
//! ```bash
//! DATA_DIR=data/device-a PORT=3001 cargo run
//! DATA_DIR=data/device-b PORT=3002 cargo run
//! ```

use std::env;
use std::sync::OnceLock;

/// Lazily initialized data directory from DATA_DIR env var
static DATA_DIR_VALUE: OnceLock<String> = OnceLock::new();

/// Get the base data directory (from DATA_DIR env var or default "data")
pub fn data_dir() -> &'static str {
  DATA_DIR_VALUE.get_or_init(|| env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()))
}

/// Durable key-value store file backing the engine
pub fn store_path() -> String {
  format!("{}/engine.db", data_dir())
}

// ==================== Tests ====================
