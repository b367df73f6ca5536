//! Orchestrator tests against an in-memory store and mock publishers.

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use chrono::Utc;
use nudge_core::{
  event::Facts,
  nudge::{
    AttemptStatus, CreateOutcome, DeliveryJob, DeliveryStatus, NewNotification,
    NewNudgeLog, NotificationStatus,
  },
  preference::{Channel, UserPreference},
  rule::{RuleType, Severity},
  store::NudgeStore,
};
use nudge_store_sqlite::SqliteStore;

use crate::{
  DeliveryError, Orchestrator, OrchestratorConfig, PublishError, PublishResult,
  Publisher, PublisherRegistry,
};

// ─── Mock publishers ─────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Behaviour {
  Send,
  Fail,
}

struct MockPublisher {
  channel:   Channel,
  behaviour: Behaviour,
  calls:     AtomicUsize,
}

impl MockPublisher {
  fn new(channel: Channel, behaviour: Behaviour) -> Arc<Self> {
    Arc::new(Self { channel, behaviour, calls: AtomicUsize::new(0) })
  }

  fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait::async_trait]
impl Publisher for MockPublisher {
  fn channel(&self) -> Channel { self.channel }

  async fn send(&self, _job: &DeliveryJob) -> Result<PublishResult, PublishError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match self.behaviour {
      Behaviour::Send => Ok(PublishResult::sent(Utc::now())),
      Behaviour::Fail => Err(PublishError::Rejected { status: 503, body: "down".into() }),
    }
  }
}

/// Finishes the notification itself mid-send, as a concurrent delivery would.
struct RacingPublisher {
  store: Arc<SqliteStore>,
}

#[async_trait::async_trait]
impl Publisher for RacingPublisher {
  fn channel(&self) -> Channel { Channel::Web }

  async fn send(&self, job: &DeliveryJob) -> Result<PublishResult, PublishError> {
    let n = self.store.get_notification(&job.nudge_id).await.unwrap().unwrap();
    let applied = self
      .store
      .complete_delivery(n.notification_id, vec![], NotificationStatus::Failed)
      .await
      .unwrap();
    assert!(applied);
    Ok(PublishResult::sent(Utc::now()))
  }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

async fn store() -> Arc<SqliteStore> {
  Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"))
}

fn orchestrator(
  store: &Arc<SqliteStore>,
  publishers: &[Arc<MockPublisher>],
) -> Orchestrator<SqliteStore> {
  let mut registry = PublisherRegistry::new();
  for p in publishers {
    registry.register(p.clone());
  }
  Orchestrator::new(store.clone(), registry, OrchestratorConfig::default())
}

/// Create a pending notification for `u1` in `c1`, returning the nudge id.
async fn created(store: &SqliteStore, key: &str) -> String {
  let outcome = store
    .create_notification(
      NewNudgeLog {
        rule_id:      "r1".into(),
        user_id:      "u1".into(),
        community_id: Some("c1".into()),
        dedup_key:    key.into(),
        status:       AttemptStatus::Created,
        payload:      Facts::new(),
      },
      NewNotification {
        family:    "energy".into(),
        rule_type: RuleType::Alert,
        severity:  Severity::Warning,
        title:     "Imports up".into(),
        body:      "Up 25%".into(),
      },
    )
    .await
    .unwrap();
  match outcome {
    CreateOutcome::Created { nudge, .. } => nudge.nudge_id,
    CreateOutcome::Duplicate => panic!("unexpected duplicate for {key}"),
  }
}

async fn notification_status(store: &SqliteStore, nudge_id: &str) -> NotificationStatus {
  store.get_notification(nudge_id).await.unwrap().unwrap().status
}

fn pref(max_per_day: u32) -> UserPreference {
  let mut p = UserPreference::defaults("u1");
  p.community_id = Some("c1".into());
  p.max_per_day = max_per_day;
  p
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn web_delivery_is_sent() {
  let s = store().await;
  let web = MockPublisher::new(Channel::Web, Behaviour::Send);
  let o = orchestrator(&s, &[web.clone()]);
  let nudge_id = created(&s, "r1:u1:c1:a").await;

  let jobs = o.orchestrate(&nudge_id).await.unwrap();
  assert_eq!(jobs.len(), 1);
  assert_eq!(jobs[0].channel, Channel::Web);
  assert_eq!(jobs[0].destination, "web:u1:c1");
  assert_eq!(jobs[0].title, "Imports up");
  assert_eq!(jobs[0].dedup_key, "r1:u1:c1:a");
  assert_eq!(web.calls(), 1);

  assert_eq!(notification_status(&s, &nudge_id).await, NotificationStatus::Sent);
  let rows = s.list_deliveries(&nudge_id).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].status, DeliveryStatus::Sent);
  assert!(rows[0].sent_at.is_some());
}

#[tokio::test]
async fn defaults_apply_without_preference() {
  let s = store().await;
  let web = MockPublisher::new(Channel::Web, Behaviour::Send);
  let email = MockPublisher::new(Channel::Email, Behaviour::Send);
  let o = orchestrator(&s, &[web.clone(), email.clone()]);
  let nudge_id = created(&s, "k").await;

  let jobs = o.orchestrate(&nudge_id).await.unwrap();
  assert_eq!(jobs.len(), 1);
  assert_eq!(jobs[0].channel, Channel::Web);
  assert_eq!(email.calls(), 0);
}

#[tokio::test]
async fn email_without_address_is_skipped() {
  let s = store().await;
  let mut p = pref(5);
  p.channel_email = true;
  s.upsert_preference(&p).await.unwrap();

  let web = MockPublisher::new(Channel::Web, Behaviour::Send);
  let email = MockPublisher::new(Channel::Email, Behaviour::Send);
  let o = orchestrator(&s, &[web.clone(), email.clone()]);
  let nudge_id = created(&s, "k").await;

  let jobs = o.orchestrate(&nudge_id).await.unwrap();
  assert_eq!(jobs.len(), 1);
  assert_eq!(email.calls(), 0);
}

#[tokio::test]
async fn email_with_address_is_dispatched() {
  let s = store().await;
  let mut p = pref(5);
  p.channel_email = true;
  p.email = Some("u1@example.org".into());
  s.upsert_preference(&p).await.unwrap();

  let web = MockPublisher::new(Channel::Web, Behaviour::Send);
  let email = MockPublisher::new(Channel::Email, Behaviour::Send);
  let o = orchestrator(&s, &[web.clone(), email.clone()]);
  let nudge_id = created(&s, "k").await;

  let jobs = o.orchestrate(&nudge_id).await.unwrap();
  let channels: Vec<Channel> = jobs.iter().map(|j| j.channel).collect();
  assert_eq!(channels, vec![Channel::Web, Channel::Email]);
  assert_eq!(jobs[1].destination, "u1@example.org");
  assert_eq!(email.calls(), 1);
  assert_eq!(s.list_deliveries(&nudge_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn failing_publisher_marks_notification_failed() {
  let s = store().await;
  let web = MockPublisher::new(Channel::Web, Behaviour::Fail);
  let o = orchestrator(&s, &[web.clone()]);
  let nudge_id = created(&s, "k").await;

  let jobs = o.orchestrate(&nudge_id).await.unwrap();
  assert_eq!(jobs.len(), 1);
  assert_eq!(notification_status(&s, &nudge_id).await, NotificationStatus::Failed);

  let rows = s.list_deliveries(&nudge_id).await.unwrap();
  assert_eq!(rows[0].status, DeliveryStatus::Failed);
  assert!(rows[0].error.as_deref().unwrap().contains("503"));
}

#[tokio::test]
async fn one_sent_channel_is_enough() {
  let s = store().await;
  let mut p = pref(5);
  p.channel_telegram = true;
  p.telegram_chat_id = Some("42".into());
  s.upsert_preference(&p).await.unwrap();

  let web = MockPublisher::new(Channel::Web, Behaviour::Fail);
  let telegram = MockPublisher::new(Channel::Telegram, Behaviour::Send);
  let o = orchestrator(&s, &[web, telegram]);
  let nudge_id = created(&s, "k").await;

  o.orchestrate(&nudge_id).await.unwrap();
  assert_eq!(notification_status(&s, &nudge_id).await, NotificationStatus::Sent);
}

#[tokio::test]
async fn missing_publisher_records_failed_row() {
  let s = store().await;
  let o = orchestrator(&s, &[]);
  let nudge_id = created(&s, "k").await;

  let jobs = o.orchestrate(&nudge_id).await.unwrap();
  assert_eq!(jobs.len(), 1);

  let rows = s.list_deliveries(&nudge_id).await.unwrap();
  assert_eq!(rows[0].status, DeliveryStatus::Failed);
  assert_eq!(
    rows[0].error.as_deref(),
    Some("no publisher registered for channel=web")
  );
  assert_eq!(notification_status(&s, &nudge_id).await, NotificationStatus::Failed);
}

// ─── Suppression ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn daily_cap_suppresses_third_delivery() {
  let s = store().await;
  s.upsert_preference(&pref(2)).await.unwrap();
  let web = MockPublisher::new(Channel::Web, Behaviour::Send);
  let o = orchestrator(&s, &[web.clone()]);

  for key in ["k1", "k2"] {
    let id = created(&s, key).await;
    assert_eq!(o.orchestrate(&id).await.unwrap().len(), 1);
  }
  assert_eq!(web.calls(), 2);

  let third = created(&s, "k3").await;
  let jobs = o.orchestrate(&third).await.unwrap();
  assert!(jobs.is_empty());
  assert_eq!(web.calls(), 2);
  assert_eq!(notification_status(&s, &third).await, NotificationStatus::Suppressed);

  let rows = s.list_deliveries(&third).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].status, DeliveryStatus::Suppressed);
  assert_eq!(rows[0].error.as_deref(), Some("rate_limited"));
}

#[tokio::test]
async fn daily_cap_is_counted_per_channel() {
  let s = store().await;
  let mut p = pref(3);
  p.channel_email = true;
  p.email = Some("u1@example.org".into());
  s.upsert_preference(&p).await.unwrap();

  let web = MockPublisher::new(Channel::Web, Behaviour::Send);
  let email = MockPublisher::new(Channel::Email, Behaviour::Send);
  let o = orchestrator(&s, &[web.clone(), email.clone()]);

  for key in ["k1", "k2", "k3"] {
    let id = created(&s, key).await;
    assert_eq!(o.orchestrate(&id).await.unwrap().len(), 2, "{key}");
    assert_eq!(notification_status(&s, &id).await, NotificationStatus::Sent);
  }
  assert_eq!(web.calls(), 3);
  assert_eq!(email.calls(), 3);

  let fourth = created(&s, "k4").await;
  assert!(o.orchestrate(&fourth).await.unwrap().is_empty());
  assert_eq!(notification_status(&s, &fourth).await, NotificationStatus::Suppressed);

  let rows = s.list_deliveries(&fourth).await.unwrap();
  let mut channels: Vec<Channel> = rows.iter().map(|r| r.channel).collect();
  channels.sort_by_key(|c| c.as_ref().to_owned());
  assert_eq!(channels, vec![Channel::Email, Channel::Web]);
  assert!(rows.iter().all(|r| {
    r.status == DeliveryStatus::Suppressed && r.error.as_deref() == Some("rate_limited")
  }));
}

#[tokio::test]
async fn capped_channel_does_not_block_others() {
  let s = store().await;
  let mut p = pref(1);
  p.channel_email = true;
  p.email = Some("u1@example.org".into());
  s.upsert_preference(&p).await.unwrap();

  // Web goes out, email fails and so stays under its cap.
  let first = orchestrator(&s, &[
    MockPublisher::new(Channel::Web, Behaviour::Send),
    MockPublisher::new(Channel::Email, Behaviour::Fail),
  ]);
  let id = created(&s, "k1").await;
  first.orchestrate(&id).await.unwrap();

  let web = MockPublisher::new(Channel::Web, Behaviour::Send);
  let email = MockPublisher::new(Channel::Email, Behaviour::Send);
  let o = orchestrator(&s, &[web.clone(), email.clone()]);
  let second = created(&s, "k2").await;

  let jobs = o.orchestrate(&second).await.unwrap();
  assert_eq!(jobs.len(), 1);
  assert_eq!(jobs[0].channel, Channel::Email);
  assert_eq!(web.calls(), 0);
  assert_eq!(email.calls(), 1);
  assert_eq!(notification_status(&s, &second).await, NotificationStatus::Sent);

  let rows = s.list_deliveries(&second).await.unwrap();
  let web_row = rows.iter().find(|r| r.channel == Channel::Web).unwrap();
  assert_eq!(web_row.status, DeliveryStatus::Suppressed);
  assert_eq!(web_row.error.as_deref(), Some("rate_limited"));
}

#[tokio::test]
async fn failed_sends_do_not_count_towards_cap() {
  let s = store().await;
  s.upsert_preference(&pref(1)).await.unwrap();
  let failing = orchestrator(&s, &[MockPublisher::new(Channel::Web, Behaviour::Fail)]);
  let first = created(&s, "k1").await;
  failing.orchestrate(&first).await.unwrap();

  let web = MockPublisher::new(Channel::Web, Behaviour::Send);
  let o = orchestrator(&s, &[web.clone()]);
  let second = created(&s, "k2").await;
  assert_eq!(o.orchestrate(&second).await.unwrap().len(), 1);
  assert_eq!(web.calls(), 1);
}

#[tokio::test]
async fn no_enabled_channels_is_suppressed() {
  let s = store().await;
  let mut p = pref(5);
  p.channel_web = false;
  p.channel_email = true;
  s.upsert_preference(&p).await.unwrap();

  let email = MockPublisher::new(Channel::Email, Behaviour::Send);
  let o = orchestrator(&s, &[email.clone()]);
  let nudge_id = created(&s, "k").await;

  assert!(o.orchestrate(&nudge_id).await.unwrap().is_empty());
  assert_eq!(email.calls(), 0);
  assert_eq!(notification_status(&s, &nudge_id).await, NotificationStatus::Suppressed);

  let rows = s.list_deliveries(&nudge_id).await.unwrap();
  assert_eq!(rows[0].error.as_deref(), Some("no_enabled_channels"));
}

// ─── Refusals ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn terminal_notification_is_not_redelivered() {
  let s = store().await;
  let web = MockPublisher::new(Channel::Web, Behaviour::Send);
  let o = orchestrator(&s, &[web.clone()]);
  let nudge_id = created(&s, "k").await;

  o.orchestrate(&nudge_id).await.unwrap();
  let err = o.orchestrate(&nudge_id).await.unwrap_err();
  assert!(matches!(
    err,
    DeliveryError::NotPending { status: NotificationStatus::Sent, .. }
  ));
  assert_eq!(web.calls(), 1);
  assert_eq!(s.list_deliveries(&nudge_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn notification_finished_elsewhere_keeps_its_outcome() {
  let s = store().await;
  let mut registry = PublisherRegistry::new();
  registry.register(Arc::new(RacingPublisher { store: s.clone() }));
  let o = Orchestrator::new(s.clone(), registry, OrchestratorConfig::default());
  let nudge_id = created(&s, "k").await;

  let jobs = o.orchestrate(&nudge_id).await.unwrap();
  assert_eq!(jobs.len(), 1);
  assert_eq!(notification_status(&s, &nudge_id).await, NotificationStatus::Failed);
  assert!(s.list_deliveries(&nudge_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_nudge_is_not_found() {
  let s = store().await;
  let o = orchestrator(&s, &[]);
  let err = o.orchestrate("nope").await.unwrap_err();
  assert!(matches!(err, DeliveryError::NudgeNotFound(id) if id == "nope"));
}

#[tokio::test]
async fn non_created_attempt_has_no_notification() {
  let s = store().await;
  let log = s
    .record_attempt(NewNudgeLog {
      rule_id:      "r1".into(),
      user_id:      "u1".into(),
      community_id: None,
      dedup_key:    "attempt:x".into(),
      status:       AttemptStatus::NotTriggered,
      payload:      Facts::new(),
    })
    .await
    .unwrap();

  let o = orchestrator(&s, &[]);
  let err = o.orchestrate(&log.nudge_id).await.unwrap_err();
  assert!(matches!(err, DeliveryError::NotificationNotFound(_)));
}
