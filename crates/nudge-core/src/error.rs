//! Error types for `nudge-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid rule definition: {0}")]
  InvalidDefinition(String),

  #[error("unknown {field} value: {value:?}")]
  UnknownValue { field: &'static str, value: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
