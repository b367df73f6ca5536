//! The evaluator registry.
//!
//! Every [`Evaluator`] variant maps onto exactly one function here. The set
//! is closed at compile time; a definition naming a kind without an
//! evaluator parses as [`Evaluator::Unregistered`] and passes through.

use nudge_core::{
  event::{Facts, as_number, is_present},
  rule::{CompareOp, Condition, Evaluator, Rule},
};
use serde_json::Value;

/// The outcome of evaluating one rule against one fact bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
  pub triggered: bool,
  /// The input facts plus anything the evaluator adds.
  pub facts:     Facts,
  /// Machine-readable reason when not triggered.
  pub reason:    Option<String>,
}

impl Evaluation {
  fn fire(facts: Facts) -> Self { Self { triggered: true, facts, reason: None } }

  fn skip(facts: Facts, reason: impl Into<String>) -> Self {
    Self { triggered: false, facts, reason: Some(reason.into()) }
  }
}

/// Keys listed in the rule's `required_facts` that are absent or null.
pub fn missing_required(rule: &Rule, facts: &Facts) -> Vec<String> {
  rule
    .definition
    .required_facts
    .iter()
    .filter(|k| !is_present(facts, k))
    .cloned()
    .collect()
}

/// Run the rule's evaluator.
pub fn evaluate(rule: &Rule, facts: &Facts) -> Evaluation {
  match &rule.definition.evaluator {
    Evaluator::StaticMessage | Evaluator::Passthrough { .. } => {
      Evaluation::fire(facts.clone())
    }
    Evaluator::ImportedUp { threshold_pct } => {
      delta_vs_threshold(facts, *threshold_pct, |d, t| d > t)
    }
    Evaluator::ImportedDown { threshold_pct } => {
      delta_vs_threshold(facts, *threshold_pct, |d, t| d < t)
    }
    Evaluator::KpiConditions { conditions } => kpi_conditions(facts, conditions),
    Evaluator::Unregistered { kind } => {
      tracing::warn!(
        rule_id = %rule.rule_id,
        %kind,
        "no evaluator registered for kind, passing through"
      );
      Evaluation::fire(facts.clone())
    }
  }
}

// ─── imported_up / imported_down ─────────────────────────────────────────────

const DELTA_KEY: &str = "delta_pct";

fn delta_vs_threshold(
  facts: &Facts,
  threshold_pct: f64,
  passes: impl Fn(f64, f64) -> bool,
) -> Evaluation {
  let Some(raw) = facts.get(DELTA_KEY).filter(|v| !v.is_null()) else {
    return Evaluation::skip(facts.clone(), format!("missing_fact:{DELTA_KEY}"));
  };
  let Some(delta) = as_number(raw) else {
    return Evaluation::skip(facts.clone(), format!("invalid_fact:{DELTA_KEY}"));
  };

  let mut enriched = facts.clone();
  enriched.insert("threshold_pct".into(), Value::from(threshold_pct));

  if passes(delta, threshold_pct) {
    Evaluation::fire(enriched)
  } else {
    Evaluation::skip(enriched, "condition_not_met")
  }
}

// ─── kpi_conditions ──────────────────────────────────────────────────────────

fn kpi_conditions(facts: &Facts, conditions: &[Condition]) -> Evaluation {
  for c in conditions {
    let Some(actual) = facts.get(&c.fact_key).filter(|v| !v.is_null()) else {
      return Evaluation::skip(facts.clone(), format!("missing_fact:{}", c.fact_key));
    };
    match compare(actual, c.op, &c.value) {
      Some(true) => {}
      Some(false) => return Evaluation::skip(facts.clone(), "condition_not_met"),
      None => {
        return Evaluation::skip(
          facts.clone(),
          format!("invalid_compare:{}", c.fact_key),
        );
      }
    }
  }
  Evaluation::fire(facts.clone())
}

/// `actual <op> expected`, or `None` when the two cannot be compared.
///
/// Ordering operators need both sides numeric. Equality compares numerically
/// when both sides are numeric and structurally otherwise.
fn compare(actual: &Value, op: CompareOp, expected: &Value) -> Option<bool> {
  let numbers = as_number(actual).zip(as_number(expected));
  Some(match op {
    CompareOp::Eq => match numbers {
      Some((a, b)) => a == b,
      None => actual == expected,
    },
    CompareOp::Ne => match numbers {
      Some((a, b)) => a != b,
      None => actual != expected,
    },
    CompareOp::Lt => numbers.map(|(a, b)| a < b)?,
    CompareOp::Le => numbers.map(|(a, b)| a <= b)?,
    CompareOp::Gt => numbers.map(|(a, b)| a > b)?,
    CompareOp::Ge => numbers.map(|(a, b)| a >= b)?,
  })
}
