//! Error types for `nudge-delivery`.

use nudge_core::nudge::NotificationStatus;
use thiserror::Error;

/// A failure that stops orchestration of a nudge.
#[derive(Debug, Error)]
pub enum DeliveryError {
  #[error("nudge not found: {0}")]
  NudgeNotFound(String),

  #[error("no notification for nudge: {0}")]
  NotificationNotFound(String),

  /// The notification already reached a terminal status.
  #[error("notification for nudge {nudge_id} is {status:?}, not pending")]
  NotPending {
    nudge_id: String,
    status:   NotificationStatus,
  },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DeliveryError {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

/// A publisher that could not hand a job to its transport.
#[derive(Debug, Error)]
pub enum PublishError {
  #[error("http request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("gateway returned {status}: {body}")]
  Rejected { status: u16, body: String },

  #[error("configuration error: {0}")]
  Config(String),
}

pub type Result<T, E = DeliveryError> = std::result::Result<T, E>;
