//! Web channel publisher.
//!
//! Forwards each job as JSON to a push gateway, which owns subscriptions and
//! the push transport itself.

use chrono::Utc;
use nudge_core::{nudge::DeliveryJob, preference::Channel};
use serde::Serialize;

use crate::{
  error::PublishError,
  publisher::{PublishResult, Publisher},
};

#[derive(Debug, Serialize)]
struct PushData<'a> {
  url:      &'a str,
  nudge_id: &'a str,
  rule_id:  &'a str,
}

/// Body posted to the gateway.
#[derive(Debug, Serialize)]
struct PushMessage<'a> {
  destination: &'a str,
  user_id:     &'a str,
  title:       &'a str,
  body:        &'a str,
  data:        PushData<'a>,
}

#[derive(Debug, Clone)]
pub struct WebPublisher {
  gateway_url: String,
  /// Where the client opens when the notification is clicked.
  click_url:   String,
  client:      reqwest::Client,
}

impl WebPublisher {
  /// A publisher posting to `gateway_url`, which must be an absolute
  /// http(s) URL.
  pub fn new(gateway_url: impl Into<String>) -> Result<Self, PublishError> {
    let gateway_url = gateway_url.into();
    let parsed = reqwest::Url::parse(&gateway_url)
      .map_err(|e| PublishError::Config(format!("gateway url {gateway_url:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
      return Err(PublishError::Config(format!(
        "gateway url {gateway_url:?} is not http(s)"
      )));
    }
    Ok(Self {
      gateway_url,
      click_url: "/".to_owned(),
      client: reqwest::Client::new(),
    })
  }

  pub fn with_click_url(mut self, url: impl Into<String>) -> Self {
    self.click_url = url.into();
    self
  }
}

#[async_trait::async_trait]
impl Publisher for WebPublisher {
  fn channel(&self) -> Channel { Channel::Web }

  async fn send(&self, job: &DeliveryJob) -> Result<PublishResult, PublishError> {
    let message = PushMessage {
      destination: &job.destination,
      user_id:     &job.user_id,
      title:       &job.title,
      body:        &job.body,
      data:        PushData {
        url:      &self.click_url,
        nudge_id: &job.nudge_id,
        rule_id:  &job.rule_id,
      },
    };

    let response = self
      .client
      .post(&self.gateway_url)
      .json(&message)
      .send()
      .await?;
    let status = response.status();

    if !status.is_success() {
      let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_owned());
      tracing::warn!(
        url = %self.gateway_url,
        %status,
        nudge_id = %job.nudge_id,
        "push gateway returned non-2xx status"
      );
      return Err(PublishError::Rejected { status: status.as_u16(), body });
    }

    tracing::debug!(nudge_id = %job.nudge_id, %status, "web push handed to gateway");
    Ok(PublishResult::sent(Utc::now()))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
  use serde_json::{Value, json};

  use super::*;

  fn job() -> DeliveryJob {
    DeliveryJob {
      job_id:       "j1".into(),
      user_id:      "u1".into(),
      community_id: Some("c1".into()),
      rule_id:      "r1".into(),
      nudge_id:     "n1".into(),
      channel:      Channel::Web,
      destination:  "web:u1:c1".into(),
      title:        "Title".into(),
      body:         "Body".into(),
      dedup_key:    "r1:u1:c1:2026-02-24".into(),
      created_at:   Utc::now(),
    }
  }

  /// Serve `status` on `/push`, capturing request bodies.
  async fn gateway(status: StatusCode) -> (String, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
      .route(
        "/push",
        post(move |State(seen): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
          seen.lock().unwrap().push(body);
          status
        }),
      )
      .with_state(seen.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{addr}/push"), seen)
  }

  #[tokio::test]
  async fn posts_title_body_and_data() {
    let (url, seen) = gateway(StatusCode::ACCEPTED).await;
    let publisher = WebPublisher::new(url).unwrap().with_click_url("/energy");

    let result = publisher.send(&job()).await.unwrap();
    assert_eq!(result.status, nudge_core::nudge::DeliveryStatus::Sent);
    assert!(result.sent_at.is_some());

    let bodies = seen.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(
      bodies[0],
      json!({
        "destination": "web:u1:c1",
        "user_id": "u1",
        "title": "Title",
        "body": "Body",
        "data": { "url": "/energy", "nudge_id": "n1", "rule_id": "r1" },
      })
    );
  }

  #[tokio::test]
  async fn non_success_status_is_rejected() {
    let (url, _) = gateway(StatusCode::GONE).await;
    let err = WebPublisher::new(url).unwrap().send(&job()).await.unwrap_err();
    assert!(matches!(err, PublishError::Rejected { status: 410, .. }));
  }

  #[test]
  fn rejects_non_http_gateway_urls() {
    assert!(matches!(WebPublisher::new("not a url"), Err(PublishError::Config(_))));
    assert!(matches!(
      WebPublisher::new("ftp://gateway.local/push"),
      Err(PublishError::Config(_))
    ));
  }

  #[tokio::test]
  async fn unreachable_gateway_is_an_http_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = WebPublisher::new(format!("http://{addr}/push"))
      .unwrap()
      .send(&job())
      .await
      .unwrap_err();
    assert!(matches!(err, PublishError::Http(_)));
  }
}
