//! End-to-end tests for the ingest endpoint.

use std::sync::Arc;

use axum::{
  body::Body,
  http::{Request, StatusCode, header},
};
use chrono::Utc;
use nudge_core::{
  nudge::{AttemptStatus, DeliveryJob, NotificationStatus},
  preference::{Channel, UserPreference},
  rule::{DedupWindow, Evaluator, Rule, RuleDefinition},
  store::NudgeStore,
  template::Template,
};
use nudge_delivery::{
  LogPublisher, Orchestrator, OrchestratorConfig, PublishError, PublishResult, Publisher,
  PublisherRegistry,
};
use nudge_engine::{Engine, EngineConfig};
use nudge_store_sqlite::SqliteStore;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::{AppState, api_router};

async fn make_state() -> (AppState<SqliteStore>, Arc<SqliteStore>) {
  let store = seeded_store().await;
  let publishers = PublisherRegistry::new().with(Arc::new(LogPublisher::new(Channel::Web)));
  (state_with(&store, publishers), store)
}

async fn seeded_store() -> Arc<SqliteStore> {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  seed_rule(&store, "imported_up_daily", 20.0).await;
  store
}

async fn seed_rule(store: &SqliteStore, rule_id: &str, threshold_pct: f64) {
  let rule = Rule::new(
    rule_id,
    "energy",
    RuleDefinition::new(Evaluator::ImportedUp { threshold_pct }, DedupWindow::Daily)
      .with_scenarios(["imported_up"])
      .with_required_facts(["delta_pct"]),
  );
  store.upsert_rule(&rule).await.unwrap();
  store
    .upsert_template(&Template::new(
      rule_id,
      "en",
      "Imports up",
      "Imports rose {{ delta_pct }}% on {{ date }}",
    ))
    .await
    .unwrap();
}

fn state_with(store: &Arc<SqliteStore>, publishers: PublisherRegistry) -> AppState<SqliteStore> {
  AppState {
    engine:       Arc::new(Engine::new(store.clone(), EngineConfig::default())),
    orchestrator: Arc::new(Orchestrator::new(
      store.clone(),
      publishers,
      OrchestratorConfig::default(),
    )),
  }
}

/// Web publisher that, while sending, finishes every other pending
/// notification of the same user as failed.
struct PreemptingPublisher {
  store: Arc<SqliteStore>,
}

#[async_trait::async_trait]
impl Publisher for PreemptingPublisher {
  fn channel(&self) -> Channel { Channel::Web }

  async fn send(&self, job: &DeliveryJob) -> Result<PublishResult, PublishError> {
    for nudge in self.store.list_nudges(&job.user_id).await.unwrap() {
      if nudge.nudge_id == job.nudge_id {
        continue;
      }
      if let Some(n) = self.store.get_notification(&nudge.nudge_id).await.unwrap() {
        if n.status == NotificationStatus::Pending {
          self
            .store
            .complete_delivery(n.notification_id, vec![], NotificationStatus::Failed)
            .await
            .unwrap();
        }
      }
    }
    Ok(PublishResult::sent(Utc::now()))
  }
}

async fn post_event(state: AppState<SqliteStore>, body: Value) -> (StatusCode, Value) {
  let req = Request::builder()
    .method("POST")
    .uri("/ingest-event")
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(body.to_string()))
    .unwrap();
  let resp = api_router(state).oneshot(req).await.unwrap();
  let status = resp.status();
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let json = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap()
  };
  (status, json)
}

fn imported_up(delta: Value) -> Value {
  json!({
    "user_id": "u1",
    "community_id": "c1",
    "event_type": "energy_daily",
    "facts": {
      "facts_version": "1",
      "scenario": "imported_up",
      "date": "2026-02-24",
      "delta_pct": delta,
    },
  })
}

// ─── Created ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn created_event_returns_jobs() {
  let (state, store) = make_state().await;
  let (status, body) = post_event(state, imported_up(json!(25))).await;
  assert_eq!(status, StatusCode::OK, "{body}");

  let result = &body["results"][0];
  assert_eq!(result["status"], json!("created"));
  assert_eq!(result["nudge"]["rule_id"], json!("imported_up_daily"));
  assert_eq!(result["delivery_jobs"][0]["channel"], json!("web"));
  assert_eq!(result["delivery_jobs"][0]["destination"], json!("web:u1:c1"));
  assert_eq!(
    result["delivery_jobs"][0]["body"],
    json!("Imports rose 25% on 2026-02-24")
  );

  let nudge_id = result["nudge"]["nudge_id"].as_str().unwrap();
  let rows = store.list_deliveries(nudge_id).await.unwrap();
  assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn created_but_rate_limited_is_accepted() {
  let (state, store) = make_state().await;
  let mut pref = UserPreference::defaults("u1");
  pref.max_per_day = 0;
  store.upsert_preference(&pref).await.unwrap();

  let (status, body) = post_event(state, imported_up(json!(25))).await;
  assert_eq!(status, StatusCode::ACCEPTED, "{body}");
  assert_eq!(body["results"][0]["status"], json!("created"));
  assert!(body["results"][0].get("delivery_jobs").is_none());
}

#[tokio::test]
async fn repeat_in_same_day_conflicts() {
  let (state, store) = make_state().await;
  let (first, _) = post_event(state.clone(), imported_up(json!(25))).await;
  assert_eq!(first, StatusCode::OK);

  let (second, body) = post_event(state, imported_up(json!(30))).await;
  assert_eq!(second, StatusCode::CONFLICT);
  assert_eq!(body["results"][0]["status"], json!("suppressed_dedup"));

  let statuses: Vec<AttemptStatus> = store
    .list_nudges("u1")
    .await
    .unwrap()
    .into_iter()
    .map(|n| n.status)
    .collect();
  assert_eq!(statuses, vec![AttemptStatus::Created, AttemptStatus::SuppressedDedup]);
}

#[tokio::test]
async fn delivery_error_does_not_abort_other_results() {
  let store = seeded_store().await;
  seed_rule(&store, "imported_up_alert", 10.0).await;
  let publishers =
    PublisherRegistry::new().with(Arc::new(PreemptingPublisher { store: store.clone() }));
  let state = state_with(&store, publishers);

  let (status, body) = post_event(state, imported_up(json!(25))).await;
  assert_eq!(status, StatusCode::OK, "{body}");

  let results = body["results"].as_array().unwrap();
  assert_eq!(results.len(), 2);
  assert!(results.iter().all(|r| r["status"] == json!("created")));

  let delivered = results.iter().filter(|r| r.get("delivery_jobs").is_some()).count();
  let errored: Vec<&Value> = results.iter().filter_map(|r| r.get("delivery_error")).collect();
  assert_eq!(delivered, 1);
  assert_eq!(errored.len(), 1);
  assert!(errored[0].as_str().unwrap().contains("not pending"), "{}", errored[0]);
}

// ─── Not created ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn below_threshold_is_no_content() {
  let (state, _) = make_state().await;
  let (status, body) = post_event(state, imported_up(json!(20))).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn missing_delta_is_unprocessable() {
  let (state, _) = make_state().await;
  let mut event = imported_up(json!(0));
  event["facts"].as_object_mut().unwrap().remove("delta_pct");

  let (status, body) = post_event(state, event).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(body["results"][0]["reason"], json!("missing_required_facts"));
  assert_eq!(body["results"][0]["details"]["missing"], json!(["delta_pct"]));
}

#[tokio::test]
async fn unmapped_scenario_is_bad_request() {
  let (state, _) = make_state().await;
  let mut event = imported_up(json!(25));
  event["facts"]["scenario"] = json!("solar_down");

  let (status, body) = post_event(state, event).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["results"][0]["status"], json!("unknown_scenario"));
  assert_eq!(body["results"][0]["reason"], json!("scenario_not_mapped"));
}

#[tokio::test]
async fn empty_user_is_rejected() {
  let (state, store) = make_state().await;
  let mut event = imported_up(json!(25));
  event["user_id"] = json!("  ");

  let (status, body) = post_event(state, event).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("user_id"));
  assert!(store.list_nudges("  ").await.unwrap().is_empty());
}
