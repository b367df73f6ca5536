//! JSON HTTP surface for the nudge engine.
//!
//! Exposes an axum [`Router`] with a single ingest endpoint backed by any
//! [`NudgeStore`]. Auth, TLS and request tracing are the caller's concern.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .merge(nudge_api::api_router(state))
//! ```

pub mod error;
pub mod ingest;

use std::sync::Arc;

use axum::{Router, routing::post};
use nudge_core::store::NudgeStore;
use nudge_delivery::Orchestrator;
use nudge_engine::Engine;

pub use error::ApiError;

/// Shared state threaded through the handlers.
pub struct AppState<S> {
  pub engine:       Arc<Engine<S>>,
  pub orchestrator: Arc<Orchestrator<S>>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      engine:       self.engine.clone(),
      orchestrator: self.orchestrator.clone(),
    }
  }
}

/// Build the API router for `state`.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: NudgeStore + 'static,
{
  Router::new()
    .route("/ingest-event", post(ingest::handler::<S>))
    .with_state(state)
}

#[cfg(test)]
mod tests;
