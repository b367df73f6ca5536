//! Delivery of created notifications.
//!
//! The [`Orchestrator`] turns a freshly created nudge into channel-specific
//! [`DeliveryJob`](nudge_core::nudge::DeliveryJob)s, enforces the user's
//! daily cap, hands jobs to the registered [`Publisher`]s and records the
//! outcome.

pub mod error;
pub mod orchestrator;
pub mod publisher;
pub mod web;

pub use error::{DeliveryError, PublishError, Result};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use publisher::{LogPublisher, PublishResult, Publisher, PublisherRegistry};
pub use web::WebPublisher;

#[cfg(test)]
mod tests;
