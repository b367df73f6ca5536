//! The per-channel [`Publisher`] trait and the registry the orchestrator
//! dispatches through.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use nudge_core::{
  nudge::{DeliveryJob, DeliveryStatus},
  preference::Channel,
};

use crate::error::PublishError;

/// What a publisher did with one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
  pub status:  DeliveryStatus,
  pub sent_at: Option<DateTime<Utc>>,
  pub error:   Option<String>,
}

impl PublishResult {
  pub fn sent(at: DateTime<Utc>) -> Self {
    Self { status: DeliveryStatus::Sent, sent_at: Some(at), error: None }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Self { status: DeliveryStatus::Failed, sent_at: None, error: Some(error.into()) }
  }

  pub fn suppressed(reason: impl Into<String>) -> Self {
    Self {
      status:  DeliveryStatus::Suppressed,
      sent_at: None,
      error:   Some(reason.into()),
    }
  }
}

/// A transport for one channel.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
  /// The channel this publisher serves.
  fn channel(&self) -> Channel;

  /// Hand `job` to the transport.
  ///
  /// `Err` means the transport could not be reached or refused the job; the
  /// orchestrator records it as a failed delivery.
  async fn send(&self, job: &DeliveryJob) -> Result<PublishResult, PublishError>;
}

/// Channel → publisher lookup. One publisher per channel.
#[derive(Clone, Default)]
pub struct PublisherRegistry {
  publishers: HashMap<Channel, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
  pub fn new() -> Self { Self::default() }

  /// Register `publisher` for its channel, replacing any previous one.
  pub fn register(&mut self, publisher: Arc<dyn Publisher>) -> &mut Self {
    self.publishers.insert(publisher.channel(), publisher);
    self
  }

  pub fn with(mut self, publisher: Arc<dyn Publisher>) -> Self {
    self.register(publisher);
    self
  }

  pub fn get(&self, channel: Channel) -> Option<&Arc<dyn Publisher>> {
    self.publishers.get(&channel)
  }

  pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
    self.publishers.keys().copied()
  }
}

impl std::fmt::Debug for PublisherRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_set().entries(self.channels()).finish()
  }
}

/// A publisher that only logs the job and reports it sent.
///
/// Stands in for a channel whose transport is not configured.
#[derive(Debug, Clone, Copy)]
pub struct LogPublisher {
  channel: Channel,
}

impl LogPublisher {
  pub fn new(channel: Channel) -> Self { Self { channel } }
}

#[async_trait::async_trait]
impl Publisher for LogPublisher {
  fn channel(&self) -> Channel { self.channel }

  async fn send(&self, job: &DeliveryJob) -> Result<PublishResult, PublishError> {
    tracing::info!(
      channel = %self.channel,
      destination = %job.destination,
      nudge_id = %job.nudge_id,
      title = %job.title,
      "delivery logged"
    );
    Ok(PublishResult::sent(Utc::now()))
  }
}
