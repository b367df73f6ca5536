//! Turning a created nudge into deliveries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nudge_core::{
  nudge::{DeliveryJob, DeliveryLog, DeliveryStatus, NotificationStatus, NudgeLog},
  preference::{Channel, DEFAULT_MAX_PER_DAY, UserPreference},
  store::NudgeStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
  error::{DeliveryError, Result},
  publisher::{PublishResult, PublisherRegistry},
};

pub const RATE_LIMITED: &str = "rate_limited";
pub const NO_ENABLED_CHANNELS: &str = "no_enabled_channels";

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
  /// Daily cap for users without a preference row.
  #[serde(default = "default_max_per_day")]
  pub max_per_day_default: u32,
}

fn default_max_per_day() -> u32 { DEFAULT_MAX_PER_DAY }

impl Default for OrchestratorConfig {
  fn default() -> Self { Self { max_per_day_default: DEFAULT_MAX_PER_DAY } }
}

/// The web destination for a user, scoped to a community when present.
pub fn web_destination(user_id: &str, community_id: Option<&str>) -> String {
  match community_id {
    Some(c) => format!("web:{user_id}:{c}"),
    None => format!("web:{user_id}"),
  }
}

/// Where `channel` reaches this user, if the preference says.
fn destination(pref: &UserPreference, channel: Channel, nudge: &NudgeLog) -> Option<String> {
  let non_empty = |s: &Option<String>| s.as_deref().filter(|s| !s.is_empty()).map(str::to_owned);
  match channel {
    Channel::Web => Some(web_destination(&nudge.user_id, nudge.community_id.as_deref())),
    Channel::Email => non_empty(&pref.email),
    Channel::Telegram => non_empty(&pref.telegram_chat_id),
    Channel::Whatsapp => non_empty(&pref.whatsapp_phone),
  }
}

/// Collapse per-channel outcomes: any sent wins, then all-suppressed, else
/// failed.
pub fn aggregate(statuses: &[DeliveryStatus]) -> NotificationStatus {
  if statuses.contains(&DeliveryStatus::Sent) {
    NotificationStatus::Sent
  } else if !statuses.is_empty() && statuses.iter().all(|s| *s == DeliveryStatus::Suppressed) {
    NotificationStatus::Suppressed
  } else {
    NotificationStatus::Failed
  }
}

pub struct Orchestrator<S> {
  store:               Arc<S>,
  publishers:          PublisherRegistry,
  max_per_day_default: u32,
}

impl<S> Orchestrator<S>
where
  S: NudgeStore,
{
  pub fn new(store: Arc<S>, publishers: PublisherRegistry, config: OrchestratorConfig) -> Self {
    Self { store, publishers, max_per_day_default: config.max_per_day_default }
  }

  /// Deliver the notification created with `nudge_id`.
  ///
  /// Returns the jobs that were handed to publishers. Channels that already
  /// reached the user's daily cap are recorded as suppressed instead; an
  /// empty list means nothing was sent (every channel capped, or nowhere to
  /// send it).
  pub async fn orchestrate(&self, nudge_id: &str) -> Result<Vec<DeliveryJob>> {
    let nudge = self
      .store
      .get_nudge(nudge_id)
      .await
      .map_err(DeliveryError::store)?
      .ok_or_else(|| DeliveryError::NudgeNotFound(nudge_id.to_owned()))?;
    let notification = self
      .store
      .get_notification(nudge_id)
      .await
      .map_err(DeliveryError::store)?
      .ok_or_else(|| DeliveryError::NotificationNotFound(nudge_id.to_owned()))?;
    if notification.status != NotificationStatus::Pending {
      return Err(DeliveryError::NotPending {
        nudge_id: nudge_id.to_owned(),
        status:   notification.status,
      });
    }

    let pref = self.preference(&nudge).await?;
    let now = Utc::now();

    let targets: Vec<(Channel, String)> = pref
      .enabled_channels()
      .into_iter()
      .filter_map(|channel| Some((channel, destination(&pref, channel, &nudge)?)))
      .collect();

    let mut deliveries = Vec::with_capacity(targets.len().max(1));
    let mut jobs = Vec::with_capacity(targets.len());

    if targets.is_empty() {
      tracing::info!(user_id = %nudge.user_id, nudge_id, "no enabled channel with a destination");
      let web = web_destination(&nudge.user_id, nudge.community_id.as_deref());
      deliveries.push(suppressed(&nudge, Channel::Web, web, NO_ENABLED_CHANNELS, now));
    }

    // Daily cap, per channel. Read-then-decide: concurrent deliveries may
    // overshoot.
    for (channel, destination) in targets {
      let sent_today = self
        .store
        .count_sent_on(
          &nudge.user_id,
          nudge.community_id.as_deref(),
          channel,
          now.date_naive(),
        )
        .await
        .map_err(DeliveryError::store)?;
      if sent_today >= pref.max_per_day {
        tracing::info!(
          user_id = %nudge.user_id,
          nudge_id,
          %channel,
          sent_today,
          max_per_day = pref.max_per_day,
          "daily cap reached, suppressing channel"
        );
        deliveries.push(suppressed(&nudge, channel, destination, RATE_LIMITED, now));
        continue;
      }
      jobs.push(DeliveryJob {
        job_id: Uuid::new_v4().simple().to_string(),
        user_id: nudge.user_id.clone(),
        community_id: nudge.community_id.clone(),
        rule_id: nudge.rule_id.clone(),
        nudge_id: nudge.nudge_id.clone(),
        channel,
        destination,
        title: notification.title.clone(),
        body: notification.body.clone(),
        dedup_key: nudge.dedup_key.clone(),
        created_at: now,
      });
    }

    for job in &jobs {
      let result = self.publish(job).await;
      deliveries.push(DeliveryLog {
        delivery_id:  job.job_id.clone(),
        nudge_id:     job.nudge_id.clone(),
        user_id:      job.user_id.clone(),
        community_id: job.community_id.clone(),
        channel:      job.channel,
        destination:  job.destination.clone(),
        status:       result.status,
        error:        result.error,
        created_at:   job.created_at,
        sent_at:      result.sent_at,
      });
    }

    let statuses: Vec<DeliveryStatus> = deliveries.iter().map(|d| d.status).collect();
    let status = aggregate(&statuses);
    let applied = self
      .store
      .complete_delivery(notification.notification_id, deliveries, status)
      .await
      .map_err(DeliveryError::store)?;
    if applied {
      tracing::info!(nudge_id, status = status.as_ref(), jobs = jobs.len(), "delivery complete");
    } else {
      // Someone else finished this notification while we were working.
      let current = self
        .store
        .get_notification(nudge_id)
        .await
        .map_err(DeliveryError::store)?
        .map(|n| n.status);
      tracing::warn!(
        nudge_id,
        current = ?current,
        "notification left pending state during delivery, outcome not recorded"
      );
    }
    Ok(jobs)
  }

  /// The effective preference, or defaults when the user has none.
  async fn preference(&self, nudge: &NudgeLog) -> Result<UserPreference> {
    let pref = self
      .store
      .get_preference(&nudge.user_id, nudge.community_id.as_deref())
      .await
      .map_err(DeliveryError::store)?;
    Ok(pref.unwrap_or_else(|| {
      let mut p = UserPreference::defaults(nudge.user_id.clone());
      p.community_id = nudge.community_id.clone();
      p.max_per_day = self.max_per_day_default;
      p
    }))
  }

  async fn publish(&self, job: &DeliveryJob) -> PublishResult {
    let Some(publisher) = self.publishers.get(job.channel) else {
      tracing::warn!(channel = %job.channel, nudge_id = %job.nudge_id, "no publisher registered");
      return PublishResult::failed(format!("no publisher registered for channel={}", job.channel));
    };
    match publisher.send(job).await {
      Ok(result) => result,
      Err(error) => {
        tracing::warn!(
          channel = %job.channel,
          nudge_id = %job.nudge_id,
          %error,
          "publish failed"
        );
        PublishResult::failed(error.to_string())
      }
    }
  }
}

/// A delivery row recording that `channel` was not attempted.
fn suppressed(
  nudge: &NudgeLog,
  channel: Channel,
  destination: String,
  reason: &str,
  now: DateTime<Utc>,
) -> DeliveryLog {
  DeliveryLog {
    delivery_id: Uuid::new_v4().simple().to_string(),
    nudge_id: nudge.nudge_id.clone(),
    user_id: nudge.user_id.clone(),
    community_id: nudge.community_id.clone(),
    channel,
    destination,
    status: DeliveryStatus::Suppressed,
    error: Some(reason.to_owned()),
    created_at: now,
    sent_at: None,
  }
}
