//! Scenario → rule resolution.
//!
//! Resolution is a pure function of the loaded rules and a [`ResolverConfig`]
//! fixed at construction. There is no process-global mapping.

use std::collections::HashMap;

use nudge_core::rule::{Frequency, Rule, RuleOverride};
use serde::Deserialize;

/// Static knobs for the resolver.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolverConfig {
  /// Legacy scenario → rule-id mapping, consulted only when no rule declares
  /// the scenario itself.
  #[serde(default)]
  pub scenario_rules:      HashMap<String, Vec<String>>,
  /// As a last resort, treat the scenario name as a rule id.
  #[serde(default)]
  pub fallback_to_rule_id: bool,
}

/// Why resolution produced no rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMiss {
  /// Nothing answers the scenario at all.
  ScenarioNotMapped,
  /// Rules answer the scenario, but none at the event's time granularity.
  NoRuleForFrequency,
}

impl ResolveMiss {
  pub fn reason(self) -> &'static str {
    match self {
      Self::ScenarioNotMapped => "scenario_not_mapped",
      Self::NoRuleForFrequency => "no_rule_for_inferred_frequency",
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct RuleResolver {
  config: ResolverConfig,
}

impl RuleResolver {
  pub fn new(config: ResolverConfig) -> Self { Self { config } }

  pub fn config(&self) -> &ResolverConfig { &self.config }

  /// Every enabled rule answering `scenario`, before the frequency filter.
  ///
  /// Rules declaring the scenario win outright; the legacy mapping and the
  /// id fallback are only consulted when none does.
  pub fn candidates<'r>(&self, rules: &'r [Rule], scenario: &str) -> Vec<&'r Rule> {
    let declared: Vec<&Rule> = rules
      .iter()
      .filter(|r| r.enabled && r.declares(scenario))
      .collect();
    if !declared.is_empty() {
      return declared;
    }

    let enabled = move |id: &str| rules.iter().find(|r| r.enabled && r.rule_id == id);

    if let Some(ids) = self.config.scenario_rules.get(scenario) {
      let mapped: Vec<&Rule> = ids.iter().filter_map(|id| enabled(id.as_str())).collect();
      if !mapped.is_empty() {
        return mapped;
      }
    }

    if self.config.fallback_to_rule_id {
      return enabled(scenario).into_iter().collect();
    }

    Vec::new()
  }

  /// Resolve `scenario` at `frequency` to the rules that should be
  /// evaluated, in a stable order.
  pub fn resolve<'r>(
    &self,
    rules: &'r [Rule],
    scenario: &str,
    frequency: Frequency,
  ) -> Result<Vec<&'r Rule>, ResolveMiss> {
    let candidates = self.candidates(rules, scenario);
    if candidates.is_empty() {
      return Err(ResolveMiss::ScenarioNotMapped);
    }

    let matching: Vec<&Rule> = candidates
      .into_iter()
      .filter(|r| r.definition.dedup_window.accepts(frequency))
      .collect();
    if matching.is_empty() {
      return Err(ResolveMiss::NoRuleForFrequency);
    }
    Ok(matching)
  }
}

/// Apply a community's overrides to the loaded rules.
///
/// A rule whose merged definition no longer validates is dropped for that
/// community rather than evaluated with its base definition.
pub fn apply_overrides(rules: Vec<Rule>, overrides: &[RuleOverride]) -> Vec<Rule> {
  if overrides.is_empty() {
    return rules;
  }
  rules
    .into_iter()
    .filter_map(|rule| {
      let Some(ov) = overrides.iter().find(|o| o.rule_id == rule.rule_id) else {
        return Some(rule);
      };
      match rule.with_override(ov) {
        Ok(effective) => Some(effective),
        Err(error) => {
          tracing::warn!(
            rule_id = %rule.rule_id,
            community_id = %ov.community_id,
            %error,
            "dropping rule with invalid override"
          );
          None
        }
      }
    })
    .collect()
}
