//! Inbound events and the fact bundles they carry.
//!
//! A fact bundle is the enriched, free-form payload computed upstream for a
//! monitored entity. The engine only ever reads a handful of well-known keys
//! from it (`facts_version`, `scenario`, the time keys, `lang`); everything
//! else is passed through to evaluators and templates untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The enriched key/value payload of an event.
pub type Facts = serde_json::Map<String, Value>;

// ─── Inbound event ───────────────────────────────────────────────────────────

/// An event describing something that happened to a user's monitored entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
  pub user_id:      String,
  #[serde(default)]
  pub community_id: Option<String>,
  pub event_type:   String,
  #[serde(default = "Utc::now")]
  pub timestamp:    DateTime<Utc>,
  /// Raw references attached by the producer. Overlaid on top of `facts`.
  #[serde(default)]
  pub payload:      Facts,
  /// Computed metrics ready for rules and templates.
  #[serde(default)]
  pub facts:        Facts,
}

impl InboundEvent {
  /// Convenience constructor with an empty payload and the current time.
  pub fn new(user_id: impl Into<String>, facts: Facts) -> Self {
    Self {
      user_id: user_id.into(),
      community_id: None,
      event_type: "facts".to_owned(),
      timestamp: Utc::now(),
      payload: Facts::new(),
      facts,
    }
  }

  pub fn with_community(mut self, community_id: impl Into<String>) -> Self {
    self.community_id = Some(community_id.into());
    self
  }

  /// The bundle the engine evaluates: `facts` with `payload` keys laid over
  /// the top.
  pub fn merged_facts(&self) -> Facts {
    let mut out = self.facts.clone();
    for (k, v) in &self.payload {
      out.insert(k.clone(), v.clone());
    }
    out
  }
}

// ─── Accessors ───────────────────────────────────────────────────────────────

/// Return `facts[key]` if it is a non-empty string.
pub fn non_empty_str<'a>(facts: &'a Facts, key: &str) -> Option<&'a str> {
  facts
    .get(key)
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
}

/// Coerce a fact value to `f64`: numbers as-is, numeric strings parsed,
/// booleans as 0/1. Anything else is not numeric.
pub fn as_number(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse().ok(),
    Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
    _ => None,
  }
}

/// A fact is present when its key exists and its value is not `null`.
pub fn is_present(facts: &Facts, key: &str) -> bool {
  facts.get(key).is_some_and(|v| !v.is_null())
}
