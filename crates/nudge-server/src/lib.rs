//! Wiring for the nudge server binary: configuration, publishers and the
//! HTTP router.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::Arc,
};

use axum::Router;
use nudge_api::AppState;
use nudge_core::{
  preference::{Channel, DEFAULT_MAX_PER_DAY},
  store::NudgeStore,
  template::FALLBACK_LANG,
};
use nudge_delivery::{
  LogPublisher, Orchestrator, OrchestratorConfig, PublishError, PublisherRegistry,
  WebPublisher,
};
use nudge_engine::{Engine, EngineConfig, ResolverConfig};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `NUDGE_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                String,
  #[serde(default = "default_port")]
  pub port:                u16,
  #[serde(default = "default_store_path")]
  pub store_path:          PathBuf,
  #[serde(default = "default_lang")]
  pub default_lang:        String,
  #[serde(default = "default_max_per_day")]
  pub max_per_day_default: u32,
  /// Push gateway for the web channel. Web jobs are only logged when unset.
  #[serde(default)]
  pub web_gateway_url:     Option<String>,
  #[serde(default)]
  pub fallback_to_rule_id: bool,
  /// Legacy scenario → rule ids mapping.
  #[serde(default)]
  pub scenario_rules:      HashMap<String, Vec<String>>,
}

fn default_host() -> String { "127.0.0.1".to_owned() }
fn default_port() -> u16 { 8080 }
fn default_store_path() -> PathBuf { PathBuf::from("nudges.db") }
fn default_lang() -> String { FALLBACK_LANG.to_owned() }
fn default_max_per_day() -> u32 { DEFAULT_MAX_PER_DAY }

impl ServerConfig {
  pub fn engine_config(&self) -> EngineConfig {
    EngineConfig {
      resolver:     ResolverConfig {
        scenario_rules:      self.scenario_rules.clone(),
        fallback_to_rule_id: self.fallback_to_rule_id,
      },
      default_lang: self.default_lang.clone(),
    }
  }

  pub fn orchestrator_config(&self) -> OrchestratorConfig {
    OrchestratorConfig { max_per_day_default: self.max_per_day_default }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Application ──────────────────────────────────────────────────────────────

/// Publishers for the configured transports. Channels without one are left
/// unregistered, so their deliveries are recorded as failed.
pub fn publishers(cfg: &ServerConfig) -> Result<PublisherRegistry, PublishError> {
  let mut registry = PublisherRegistry::new();
  match &cfg.web_gateway_url {
    Some(url) => {
      registry.register(Arc::new(WebPublisher::new(url.clone())?));
    }
    None => {
      tracing::warn!("no web_gateway_url configured, web deliveries are only logged");
      registry.register(Arc::new(LogPublisher::new(Channel::Web)));
    }
  }
  Ok(registry)
}

/// Build engine and orchestrator over `store`.
pub fn app_state<S>(store: Arc<S>, cfg: &ServerConfig) -> Result<AppState<S>, PublishError>
where
  S: NudgeStore,
{
  Ok(AppState {
    engine:       Arc::new(Engine::new(store.clone(), cfg.engine_config())),
    orchestrator: Arc::new(Orchestrator::new(
      store,
      publishers(cfg)?,
      cfg.orchestrator_config(),
    )),
  })
}

/// The full HTTP application with request tracing.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: NudgeStore + 'static,
{
  nudge_api::api_router(state).layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use nudge_store_sqlite::SqliteStore;
  use tower::ServiceExt;

  use super::*;

  fn parse(toml: &str) -> ServerConfig {
    config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn empty_config_uses_defaults() {
    let cfg = parse("");
    assert_eq!(cfg.host, "127.0.0.1");
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.default_lang, "en");
    assert_eq!(cfg.max_per_day_default, 3);
    assert!(cfg.web_gateway_url.is_none());
    assert!(cfg.scenario_rules.is_empty());
  }

  #[test]
  fn scenario_rules_reach_the_resolver() {
    let cfg = parse(
      r#"
      port = 9000
      fallback_to_rule_id = true

      [scenario_rules]
      imported_up = ["imported_up_daily", "imported_up_weekly"]
      "#,
    );
    let engine = cfg.engine_config();
    assert!(engine.resolver.fallback_to_rule_id);
    assert_eq!(
      engine.resolver.scenario_rules["imported_up"],
      vec!["imported_up_daily".to_owned(), "imported_up_weekly".to_owned()]
    );
    assert_eq!(cfg.port, 9000);
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(
      expand_tilde(Path::new("~/nudges.db")),
      PathBuf::from(home).join("nudges.db")
    );
    assert_eq!(expand_tilde(Path::new("/tmp/x.db")), PathBuf::from("/tmp/x.db"));
  }

  #[test]
  fn bad_gateway_url_is_rejected() {
    let mut cfg = parse("");
    cfg.web_gateway_url = Some("gateway".into());
    assert!(matches!(publishers(&cfg), Err(PublishError::Config(_))));
  }

  #[tokio::test]
  async fn router_serves_ingest() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let state = app_state(store, &parse("")).unwrap();

    let event = serde_json::json!({
      "user_id": "u1",
      "event_type": "energy_daily",
      "facts": { "facts_version": "1", "scenario": "nothing", "date": "2026-02-24" },
    });
    let req = Request::builder()
      .method("POST")
      .uri("/ingest-event")
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(event.to_string()))
      .unwrap();
    let resp = router(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }
}
