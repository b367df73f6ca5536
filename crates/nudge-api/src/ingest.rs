//! Handler for `POST /ingest-event`.
//!
//! Runs the engine on the event, hands every created nudge to the
//! orchestrator and folds the per-rule outcomes into one status code. A
//! delivery error for one nudge is reported on that result only; the other
//! created nudges are still delivered.
//!
//! | Outcome | Status |
//! |---------|--------|
//! | any `created` | `200`, or `202` when no delivery job was dispatched |
//! | any `missing_facts` | `422` |
//! | any `unknown_scenario` | `400` |
//! | all `suppressed_dedup` | `409` |
//! | otherwise | `204` |

use axum::{
  Json,
  extract::State,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use nudge_core::{
  event::InboundEvent,
  nudge::{AttemptStatus, DeliveryJob},
  store::NudgeStore,
};
use nudge_engine::EngineResult;
use serde::Serialize;

use crate::{AppState, error::ApiError};

/// One engine result plus whatever was dispatched for it.
#[derive(Debug, Serialize)]
pub struct IngestResult {
  #[serde(flatten)]
  pub result:         EngineResult,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub delivery_jobs:  Vec<DeliveryJob>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub delivery_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
  pub results: Vec<IngestResult>,
}

/// Fold per-rule outcomes into the response status.
pub fn aggregate_status(results: &[IngestResult]) -> StatusCode {
  let any = |s: AttemptStatus| results.iter().any(|r| r.result.status == s);
  let all = |s: AttemptStatus| {
    !results.is_empty() && results.iter().all(|r| r.result.status == s)
  };

  if any(AttemptStatus::Created) {
    let dispatched = results
      .iter()
      .any(|r| r.result.is_created() && !r.delivery_jobs.is_empty());
    if dispatched { StatusCode::OK } else { StatusCode::ACCEPTED }
  } else if any(AttemptStatus::MissingFacts) {
    StatusCode::UNPROCESSABLE_ENTITY
  } else if any(AttemptStatus::UnknownScenario) {
    StatusCode::BAD_REQUEST
  } else if all(AttemptStatus::SuppressedDedup) {
    StatusCode::CONFLICT
  } else {
    StatusCode::NO_CONTENT
  }
}

/// `POST /ingest-event`
pub async fn handler<S>(
  State(state): State<AppState<S>>,
  Json(event): Json<InboundEvent>,
) -> Result<Response, ApiError>
where
  S: NudgeStore + 'static,
{
  if event.user_id.trim().is_empty() {
    return Err(ApiError::BadRequest("user_id must not be empty".to_owned()));
  }

  let outcomes = state.engine.run(&event).await?;

  let mut results = Vec::with_capacity(outcomes.len());
  for result in outcomes {
    let Some(created) = &result.nudge else {
      results.push(IngestResult { result, delivery_jobs: Vec::new(), delivery_error: None });
      continue;
    };
    let (delivery_jobs, delivery_error) =
      match state.orchestrator.orchestrate(&created.nudge_id).await {
        Ok(jobs) => (jobs, None),
        Err(error) => {
          tracing::error!(nudge_id = %created.nudge_id, %error, "delivery failed");
          (Vec::new(), Some(error.to_string()))
        }
      };
    results.push(IngestResult { result, delivery_jobs, delivery_error });
  }

  let status = aggregate_status(&results);
  tracing::debug!(
    user_id = %event.user_id,
    results = results.len(),
    %status,
    "event ingested"
  );
  if status == StatusCode::NO_CONTENT {
    return Ok(status.into_response());
  }
  Ok((status, Json(IngestResponse { results })).into_response())
}
