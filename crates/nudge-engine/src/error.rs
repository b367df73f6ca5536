//! Error types for `nudge-engine`.

use thiserror::Error;

/// A failure that aborts processing of an event.
///
/// Everything the engine can recover from (bad facts, unknown scenarios,
/// duplicates) is reported as an [`EngineResult`](crate::EngineResult)
/// instead.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

/// A template that failed to parse or render.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct RenderError(pub String);

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
