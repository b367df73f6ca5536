//! Audit records, notifications, and delivery bookkeeping.
//!
//! Every evaluation attempt leaves exactly one [`NudgeLog`] row. Only an
//! attempt that wins the dedup constraint also produces a [`Notification`];
//! the two are written in the same transaction. Delivery attempts append
//! [`DeliveryLog`] rows and move the notification to a terminal status once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  event::Facts,
  preference::Channel,
  rule::{RuleType, Severity},
};

// ─── Attempt outcome ─────────────────────────────────────────────────────────

/// The outcome of evaluating one rule (or failing to get that far) for one
/// event.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptStatus {
  Created,
  NotTriggered,
  MissingFacts,
  UnknownScenario,
  SuppressedDedup,
}

// ─── NudgeLog ────────────────────────────────────────────────────────────────

/// Append-only audit row. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeLog {
  pub nudge_id:     String,
  pub rule_id:      String,
  pub user_id:      String,
  pub community_id: Option<String>,
  /// Unique across the table. Real dedup keys appear only on `created` rows.
  pub dedup_key:    String,
  pub status:       AttemptStatus,
  /// `{scenario, facts_version, facts, details}` at the time of the attempt.
  pub payload:      Facts,
  pub created_at:   DateTime<Utc>,
}

/// Input to the store's audit writes. Ids and timestamps are assigned by the
/// store.
#[derive(Debug, Clone)]
pub struct NewNudgeLog {
  pub rule_id:      String,
  pub user_id:      String,
  pub community_id: Option<String>,
  pub dedup_key:    String,
  pub status:       AttemptStatus,
  pub payload:      Facts,
}

// ─── Notification ────────────────────────────────────────────────────────────

/// Delivery status of a notification. `Pending` moves to exactly one of the
/// other three, once.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationStatus {
  #[default]
  Pending,
  Sent,
  Suppressed,
  Failed,
}

/// The user-facing deliverable derived from a `created` nudge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
  pub notification_id: String,
  pub nudge_id:        String,
  pub rule_id:         String,
  pub user_id:         String,
  pub community_id:    Option<String>,
  pub family:          String,
  #[serde(rename = "type")]
  pub rule_type:       RuleType,
  pub severity:        Severity,
  pub title:           String,
  pub body:            String,
  pub status:          NotificationStatus,
  pub created_at:      DateTime<Utc>,
  /// Owned by the notification-management surface; never written here.
  pub read_at:         Option<DateTime<Utc>>,
  pub deleted_at:      Option<DateTime<Utc>>,
}

/// Rendered content and denormalised rule metadata for a new notification.
#[derive(Debug, Clone)]
pub struct NewNotification {
  pub family:    String,
  pub rule_type: RuleType,
  pub severity:  Severity,
  pub title:     String,
  pub body:      String,
}

/// Result of the dedup-guarded insert.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
  Created {
    nudge:        NudgeLog,
    notification: Notification,
  },
  /// Another attempt already holds this dedup key. Nothing was written.
  Duplicate,
}

// ─── Delivery ────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryStatus {
  Sent,
  Failed,
  Suppressed,
}

/// One row per dispatch attempt (or suppression decision).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLog {
  pub delivery_id:  String,
  pub nudge_id:     String,
  pub user_id:      String,
  pub community_id: Option<String>,
  pub channel:      Channel,
  pub destination:  String,
  pub status:       DeliveryStatus,
  pub error:        Option<String>,
  pub created_at:   DateTime<Utc>,
  pub sent_at:      Option<DateTime<Utc>>,
}

/// A channel-specific unit of dispatch produced by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
  pub job_id:       String,
  pub user_id:      String,
  pub community_id: Option<String>,
  pub rule_id:      String,
  pub nudge_id:     String,
  pub channel:      Channel,
  pub destination:  String,
  pub title:        String,
  pub body:         String,
  pub dedup_key:    String,
  pub created_at:   DateTime<Utc>,
}
