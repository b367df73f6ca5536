//! The per-event pipeline.
//!
//! ```text
//! contract → time scope → overrides → resolve
//!   → per rule: required facts → evaluate → template → render → dedup insert
//! ```
//!
//! Each step that stops a rule appends an audit row with a unique attempt key
//! and yields a typed [`EngineResult`]. Only the dedup-guarded insert can
//! produce [`AttemptStatus::Created`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nudge_core::{
  event::{Facts, InboundEvent, non_empty_str},
  nudge::{AttemptStatus, CreateOutcome, NewNotification, NewNudgeLog},
  rule::Rule,
  store::NudgeStore,
  template::{FALLBACK_LANG, Template},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
  contract,
  dedup::{NO_RULE, NO_SCOPE, attempt_key, dedup_key, dedup_scope},
  error::{EngineError, Result},
  evaluate::{evaluate, missing_required},
  render::{Renderer, context},
  resolve::{ResolveMiss, ResolverConfig, RuleResolver, apply_overrides},
  time_scope::{self, TimeScope},
};

// ─── Results ─────────────────────────────────────────────────────────────────

/// Identifiers of a freshly created nudge/notification pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedNudge {
  pub nudge_id:        String,
  pub notification_id: String,
  pub rule_id:         String,
  pub dedup_key:       String,
  pub title:           String,
  pub body:            String,
}

/// The outcome for one resolved rule, or for the whole event when it failed
/// before resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResult {
  pub status:  AttemptStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason:  Option<String>,
  #[serde(default, skip_serializing_if = "Facts::is_empty")]
  pub details: Facts,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub nudge:   Option<CreatedNudge>,
}

impl EngineResult {
  fn stopped(status: AttemptStatus, reason: impl Into<String>, details: Facts) -> Self {
    Self { status, reason: Some(reason.into()), details, nudge: None }
  }

  pub fn is_created(&self) -> bool { self.status == AttemptStatus::Created }
}

fn object(v: Value) -> Facts {
  match v {
    Value::Object(m) => m,
    _ => Facts::new(),
  }
}

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
  #[serde(flatten)]
  pub resolver:     ResolverConfig,
  /// Language used when neither the facts nor the user name one.
  #[serde(default = "default_lang")]
  pub default_lang: String,
}

fn default_lang() -> String { FALLBACK_LANG.to_owned() }

impl Default for EngineConfig {
  fn default() -> Self {
    Self { resolver: ResolverConfig::default(), default_lang: default_lang() }
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct Engine<S> {
  store:        Arc<S>,
  resolver:     RuleResolver,
  renderer:     Renderer,
  default_lang: String,
}

/// Everything about the event the per-rule steps need.
struct Attempt<'a> {
  user_id:       &'a str,
  community_id:  Option<&'a str>,
  scenario:      &'a str,
  facts_version: &'a str,
  facts:         &'a Facts,
  lang:          &'a str,
  now:           DateTime<Utc>,
}

impl<S> Engine<S>
where
  S: NudgeStore,
{
  pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
    Self {
      store,
      resolver: RuleResolver::new(config.resolver),
      renderer: Renderer::new(),
      default_lang: config.default_lang,
    }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Process one event. Returns one result per resolved rule, or a single
  /// result when the event failed before resolution.
  ///
  /// Only storage failures are errors.
  pub async fn run(&self, event: &InboundEvent) -> Result<Vec<EngineResult>> {
    let now = Utc::now();
    let facts = event.merged_facts();
    let user_id = event.user_id.as_str();
    let community_id = event.community_id.as_deref();

    // Contract.
    let contract = match contract::validate(&facts) {
      Ok(c) => c,
      Err(errors) => {
        let details = object(json!({ "errors": errors }));
        self
          .audit(
            AttemptStatus::MissingFacts,
            NO_RULE,
            NO_SCOPE,
            user_id,
            community_id,
            non_empty_str(&facts, "scenario").unwrap_or("unknown"),
            non_empty_str(&facts, "facts_version").unwrap_or_default(),
            &facts,
            details.clone(),
          )
          .await?;
        tracing::debug!(%user_id, ?errors, "fact bundle failed contract");
        return Ok(vec![EngineResult::stopped(
          AttemptStatus::MissingFacts,
          "invalid_facts_contract",
          details,
        )]);
      }
    };
    let scenario = contract.scenario;
    let facts_version = contract.facts_version;

    // Time scope.
    let Some(ts) = time_scope::infer(&facts) else {
      let reason = "missing_or_invalid_time_scope";
      self
        .audit(
          AttemptStatus::MissingFacts,
          NO_RULE,
          NO_SCOPE,
          user_id,
          community_id,
          scenario,
          facts_version,
          &facts,
          object(json!({ "reason": reason })),
        )
        .await?;
      return Ok(vec![EngineResult::stopped(
        AttemptStatus::MissingFacts,
        reason,
        Facts::new(),
      )]);
    };
    let normalized = time_scope::normalize(&facts, &ts);

    // Resolution.
    let rules = self.effective_rules(community_id).await?;
    let resolved = match self.resolver.resolve(&rules, scenario, ts.frequency) {
      Ok(r) => r,
      Err(miss) => {
        return self
          .unresolved(miss, &ts, user_id, community_id, scenario, facts_version, &facts)
          .await;
      }
    };

    let lang = self.resolve_lang(&normalized, user_id, community_id).await?;
    let attempt = Attempt {
      user_id,
      community_id,
      scenario,
      facts_version,
      facts: &normalized,
      lang: &lang,
      now,
    };

    let mut results = Vec::with_capacity(resolved.len());
    for rule in resolved {
      results.push(self.run_rule(rule, &attempt).await?);
    }
    Ok(results)
  }

  async fn effective_rules(&self, community_id: Option<&str>) -> Result<Vec<Rule>> {
    let rules = self.store.list_rules().await.map_err(EngineError::store)?;
    let Some(community_id) = community_id else {
      return Ok(rules);
    };
    let overrides = self
      .store
      .list_overrides(community_id)
      .await
      .map_err(EngineError::store)?;
    Ok(apply_overrides(rules, &overrides))
  }

  #[allow(clippy::too_many_arguments)]
  async fn unresolved(
    &self,
    miss: ResolveMiss,
    ts: &TimeScope,
    user_id: &str,
    community_id: Option<&str>,
    scenario: &str,
    facts_version: &str,
    facts: &Facts,
  ) -> Result<Vec<EngineResult>> {
    let reason = miss.reason();
    let (audit, result) = match miss {
      ResolveMiss::ScenarioNotMapped => (
        object(json!({ "reason": reason })),
        object(json!({ "scenario": scenario })),
      ),
      ResolveMiss::NoRuleForFrequency => (
        object(json!({ "reason": reason, "frequency": ts.frequency })),
        object(json!({ "scenario": scenario, "frequency": ts.frequency })),
      ),
    };
    self
      .audit(
        AttemptStatus::UnknownScenario,
        NO_RULE,
        &ts.scope,
        user_id,
        community_id,
        scenario,
        facts_version,
        facts,
        audit,
      )
      .await?;
    tracing::debug!(%user_id, %scenario, reason, "no rule resolved");
    Ok(vec![EngineResult::stopped(AttemptStatus::UnknownScenario, reason, result)])
  }

  /// `facts.lang`, then the user's preference, then the configured default.
  async fn resolve_lang(
    &self,
    facts: &Facts,
    user_id: &str,
    community_id: Option<&str>,
  ) -> Result<String> {
    if let Some(lang) = non_empty_str(facts, "lang") {
      return Ok(lang.to_owned());
    }
    let pref = self
      .store
      .get_preference(user_id, community_id)
      .await
      .map_err(EngineError::store)?;
    Ok(
      pref
        .map(|p| p.lang)
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| self.default_lang.clone()),
    )
  }

  async fn find_template(&self, rule_id: &str, lang: &str) -> Result<Option<Template>> {
    let mut langs = vec![lang];
    if lang != FALLBACK_LANG {
      langs.push(FALLBACK_LANG);
    }
    for l in langs {
      if let Some(t) = self
        .store
        .get_template(rule_id, l)
        .await
        .map_err(EngineError::store)?
      {
        return Ok(Some(t));
      }
    }
    Ok(None)
  }

  async fn run_rule(&self, rule: &Rule, a: &Attempt<'_>) -> Result<EngineResult> {
    let rule_id = rule.rule_id.as_str();
    let scope = dedup_scope(rule.definition.dedup_window, a.facts, a.now);

    // Required facts.
    let missing = missing_required(rule, a.facts);
    if !missing.is_empty() {
      let d = object(json!({ "missing": missing }));
      self.audit_rule(AttemptStatus::MissingFacts, rule_id, &scope, a, a.facts, d.clone()).await?;
      return Ok(EngineResult::stopped(
        AttemptStatus::MissingFacts,
        "missing_required_facts",
        d,
      ));
    }

    // Evaluation.
    let evaluation = evaluate(rule, a.facts);
    if !evaluation.triggered {
      let reason = evaluation.reason.unwrap_or_else(|| "not_triggered".to_owned());
      self
        .audit_rule(
          AttemptStatus::NotTriggered,
          rule_id,
          &scope,
          a,
          &evaluation.facts,
          object(json!({ "reason": reason })),
        )
        .await?;
      tracing::debug!(%rule_id, user_id = %a.user_id, %reason, "rule not triggered");
      return Ok(EngineResult::stopped(AttemptStatus::NotTriggered, reason, Facts::new()));
    }
    let facts = evaluation.facts;

    // Template and rendering.
    let Some(template) = self.find_template(rule_id, a.lang).await? else {
      let reason = format!("no template found for rule={rule_id} lang={}", a.lang);
      return self.unknown_scenario(rule_id, &scope, a, &facts, reason).await;
    };
    let ctx = context(a.now, a.user_id, a.community_id, &facts);
    let rendered = match self.renderer.render(&template, &ctx) {
      Ok(r) => r,
      Err(e) => {
        let reason = format!("template_render_failed: {e}");
        return self.unknown_scenario(rule_id, &scope, a, &facts, reason).await;
      }
    };

    // Dedup-guarded insert.
    let key = dedup_key(rule_id, a.user_id, a.community_id, &scope);
    let nudge = NewNudgeLog {
      rule_id:      rule_id.to_owned(),
      user_id:      a.user_id.to_owned(),
      community_id: a.community_id.map(str::to_owned),
      dedup_key:    key.clone(),
      status:       AttemptStatus::Created,
      payload:      object(json!({
        "scenario": a.scenario,
        "facts_version": a.facts_version,
        "facts": facts,
      })),
    };
    let notification = NewNotification {
      family:    rule.family.clone(),
      rule_type: rule.rule_type,
      severity:  rule.severity,
      title:     rendered.title,
      body:      rendered.body,
    };

    match self
      .store
      .create_notification(nudge, notification)
      .await
      .map_err(EngineError::store)?
    {
      CreateOutcome::Created { nudge, notification } => {
        tracing::info!(
          %rule_id,
          user_id = %a.user_id,
          dedup_key = %key,
          nudge_id = %nudge.nudge_id,
          "nudge created"
        );
        Ok(EngineResult {
          status:  AttemptStatus::Created,
          reason:  None,
          details: object(json!({
            "dedup_key": key,
            "scenario": a.scenario,
            "rule_id": rule_id,
          })),
          nudge:   Some(CreatedNudge {
            nudge_id:        nudge.nudge_id,
            notification_id: notification.notification_id,
            rule_id:         rule_id.to_owned(),
            dedup_key:       key,
            title:           notification.title,
            body:            notification.body,
          }),
        })
      }
      CreateOutcome::Duplicate => {
        let reason = "duplicate_in_dedup_window";
        self
          .audit_rule(
            AttemptStatus::SuppressedDedup,
            rule_id,
            &scope,
            a,
            a.facts,
            object(json!({ "reason": reason, "dedup_key": key })),
          )
          .await?;
        tracing::info!(%rule_id, user_id = %a.user_id, dedup_key = %key, "suppressed duplicate");
        Ok(EngineResult::stopped(
          AttemptStatus::SuppressedDedup,
          reason,
          object(json!({ "dedup_key": key })),
        ))
      }
    }
  }

  async fn unknown_scenario(
    &self,
    rule_id: &str,
    scope: &str,
    a: &Attempt<'_>,
    facts: &Facts,
    reason: String,
  ) -> Result<EngineResult> {
    tracing::warn!(%rule_id, %reason, "cannot render rule");
    self
      .audit_rule(
        AttemptStatus::UnknownScenario,
        rule_id,
        scope,
        a,
        facts,
        object(json!({ "reason": reason })),
      )
      .await?;
    Ok(EngineResult::stopped(AttemptStatus::UnknownScenario, reason, Facts::new()))
  }

  // ── Audit ─────────────────────────────────────────────────────────────────

  async fn audit_rule(
    &self,
    status: AttemptStatus,
    rule_id: &str,
    scope: &str,
    a: &Attempt<'_>,
    facts: &Facts,
    details: Facts,
  ) -> Result<()> {
    self
      .audit(
        status,
        rule_id,
        scope,
        a.user_id,
        a.community_id,
        a.scenario,
        a.facts_version,
        facts,
        details,
      )
      .await
  }

  /// Append a non-created audit row. Never creates a notification.
  #[allow(clippy::too_many_arguments)]
  async fn audit(
    &self,
    status: AttemptStatus,
    rule_id: &str,
    scope: &str,
    user_id: &str,
    community_id: Option<&str>,
    scenario: &str,
    facts_version: &str,
    facts: &Facts,
    details: Facts,
  ) -> Result<()> {
    let row = NewNudgeLog {
      rule_id:      rule_id.to_owned(),
      user_id:      user_id.to_owned(),
      community_id: community_id.map(str::to_owned),
      dedup_key:    attempt_key(rule_id, user_id, community_id, scope),
      status,
      payload:      object(json!({
        "scenario": scenario,
        "facts_version": facts_version,
        "facts": facts,
        "details": details,
      })),
    };
    self.store.record_attempt(row).await.map_err(EngineError::store)?;
    Ok(())
  }
}
