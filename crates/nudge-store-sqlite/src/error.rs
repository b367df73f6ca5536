//! Error type for `nudge-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] nudge_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value that does not map onto its domain enum.
  #[error("unknown {column} value: {value:?}")]
  UnknownValue { column: &'static str, value: String },

  /// An attempt row collided with an existing dedup key.
  #[error("dedup key already recorded: {0}")]
  KeyConflict(String),

  #[error("rule not found: {0}")]
  RuleNotFound(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
