//! The `NudgeStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `nudge-store-sqlite`).
//! The engine and the delivery orchestrator depend on this abstraction, not
//! on any concrete backend.

use std::future::Future;

use chrono::NaiveDate;

use crate::{
  nudge::{
    CreateOutcome, DeliveryLog, NewNotification, NewNudgeLog, Notification,
    NotificationStatus, NudgeLog,
  },
  preference::{Channel, UserPreference},
  rule::{Rule, RuleOverride},
  template::Template,
};

/// Abstraction over a nudge store backend.
///
/// Reference data (rules, overrides, templates, preferences) is read-only
/// here. Audit rows are append-only. The only mutation of an existing row is
/// the single `pending → terminal` transition of a notification.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait NudgeStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Reference data ────────────────────────────────────────────────────

  /// All rules, enabled or not. Rows whose definition fails validation are
  /// skipped by the backend.
  fn list_rules(
    &self,
  ) -> impl Future<Output = Result<Vec<Rule>, Self::Error>> + Send + '_;

  /// Overrides that apply to `community_id`.
  fn list_overrides<'a>(
    &'a self,
    community_id: &'a str,
  ) -> impl Future<Output = Result<Vec<RuleOverride>, Self::Error>> + Send + 'a;

  /// The template for exactly `(rule_id, lang)`; no fallback is applied.
  fn get_template<'a>(
    &'a self,
    rule_id: &'a str,
    lang: &'a str,
  ) -> impl Future<Output = Result<Option<Template>, Self::Error>> + Send + 'a;

  /// The effective preference: the community-scoped row if one exists,
  /// otherwise the user's generic row.
  fn get_preference<'a>(
    &'a self,
    user_id: &'a str,
    community_id: Option<&'a str>,
  ) -> impl Future<Output = Result<Option<UserPreference>, Self::Error>> + Send + 'a;

  // ── Audit writes ──────────────────────────────────────────────────────

  /// Append an audit row for a non-created outcome. The caller supplies a
  /// unique attempt key, so this never conflicts.
  fn record_attempt(
    &self,
    input: NewNudgeLog,
  ) -> impl Future<Output = Result<NudgeLog, Self::Error>> + Send + '_;

  /// Atomically insert a `created` nudge and its pending notification.
  ///
  /// If the dedup key is already taken the transaction is rolled back and
  /// [`CreateOutcome::Duplicate`] is returned; this is the only mechanism
  /// guaranteeing at-most-once creation.
  fn create_notification(
    &self,
    nudge: NewNudgeLog,
    notification: NewNotification,
  ) -> impl Future<Output = Result<CreateOutcome, Self::Error>> + Send + '_;

  // ── Delivery ──────────────────────────────────────────────────────────

  fn get_nudge<'a>(
    &'a self,
    nudge_id: &'a str,
  ) -> impl Future<Output = Result<Option<NudgeLog>, Self::Error>> + Send + 'a;

  /// The notification created together with `nudge_id`.
  fn get_notification<'a>(
    &'a self,
    nudge_id: &'a str,
  ) -> impl Future<Output = Result<Option<Notification>, Self::Error>> + Send + 'a;

  /// Number of `sent` deliveries on `channel` for a user on `day` (UTC).
  /// When `community_id` is set only that community's deliveries are
  /// counted.
  fn count_sent_on<'a>(
    &'a self,
    user_id: &'a str,
    community_id: Option<&'a str>,
    channel: Channel,
    day: NaiveDate,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send + 'a;

  /// Append `deliveries` and move the notification to `status` in one
  /// transaction.
  ///
  /// Returns `false` (writing nothing) if the notification is no longer
  /// pending.
  fn complete_delivery(
    &self,
    notification_id: String,
    deliveries: Vec<DeliveryLog>,
    status: NotificationStatus,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Audit reads ───────────────────────────────────────────────────────

  /// All audit rows for a user, oldest first.
  fn list_nudges<'a>(
    &'a self,
    user_id: &'a str,
  ) -> impl Future<Output = Result<Vec<NudgeLog>, Self::Error>> + Send + 'a;

  /// All delivery rows for a nudge, oldest first.
  fn list_deliveries<'a>(
    &'a self,
    nudge_id: &'a str,
  ) -> impl Future<Output = Result<Vec<DeliveryLog>, Self::Error>> + Send + 'a;
}
