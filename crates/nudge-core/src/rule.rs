//! Rules: named, versioned policies that decide when a user is nudged.
//!
//! A rule's `definition` is authored as a JSON document. It is parsed once,
//! when the rule is loaded, into a [`RuleDefinition`] whose evaluator is a
//! closed set of typed variants. Keys the model does not understand are kept
//! in [`RuleDefinition::extra`] so a definition always round-trips losslessly.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result, event::{Facts, as_number}};

// ─── Classification ──────────────────────────────────────────────────────────

/// What kind of message the rule produces.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuleType {
  Informative,
  Opportunity,
  Alert,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
  Info,
  Warning,
  Critical,
}

// ─── Time buckets ────────────────────────────────────────────────────────────

/// The granularity of the time bucket an event belongs to.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Frequency {
  Hourly,
  Daily,
  Weekly,
  Monthly,
  Yearly,
}

/// How often a rule may re-fire for the same user (and community).
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DedupWindow {
  /// Every occurrence is distinct.
  Always,
  /// At most one notification ever.
  #[serde(alias = "one")]
  #[strum(to_string = "once", serialize = "one")]
  Once,
  Hourly,
  Daily,
  Weekly,
  Monthly,
  Yearly,
}

impl DedupWindow {
  /// The time bucket this window is anchored to, if any.
  pub fn frequency(self) -> Option<Frequency> {
    match self {
      Self::Always | Self::Once => None,
      Self::Hourly => Some(Frequency::Hourly),
      Self::Daily => Some(Frequency::Daily),
      Self::Weekly => Some(Frequency::Weekly),
      Self::Monthly => Some(Frequency::Monthly),
      Self::Yearly => Some(Frequency::Yearly),
    }
  }

  /// Whether a rule with this window answers an event bucketed at
  /// `frequency`. `always` and `once` are not tied to any bucket.
  pub fn accepts(self, frequency: Frequency) -> bool {
    self.frequency().is_none_or(|f| f == frequency)
  }
}

// ─── Conditions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
  #[serde(rename = "<")]
  Lt,
  #[serde(rename = "<=")]
  Le,
  #[serde(rename = ">")]
  Gt,
  #[serde(rename = ">=")]
  Ge,
  #[serde(rename = "==")]
  Eq,
  #[serde(rename = "!=")]
  Ne,
}

/// One clause of a `kpi_conditions` rule: `facts[fact_key] <op> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
  pub fact_key: String,
  pub op:       CompareOp,
  pub value:    Value,
}

// ─── Evaluators ──────────────────────────────────────────────────────────────

pub const IMPORTED_UP_DEFAULT_THRESHOLD: f64 = 20.0;
pub const IMPORTED_DOWN_DEFAULT_THRESHOLD: f64 = -5.0;

/// Kind prefixes for informational feeds that carry no numeric gate.
const PASSTHROUGH_PREFIXES: &[&str] = &["weather", "price", "event"];

/// The typed evaluator selected by a definition's `kind`.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluator {
  StaticMessage,
  /// Weather, price and event kinds: always fire.
  Passthrough { kind: String },
  ImportedUp { threshold_pct: f64 },
  ImportedDown { threshold_pct: f64 },
  KpiConditions { conditions: Vec<Condition> },
  /// A kind with no registered evaluator.
  Unregistered { kind: String },
}

impl Evaluator {
  /// The `kind` string this evaluator was parsed from.
  pub fn kind(&self) -> &str {
    match self {
      Self::StaticMessage => "static_message",
      Self::Passthrough { kind } | Self::Unregistered { kind } => kind,
      Self::ImportedUp { .. } => "imported_up",
      Self::ImportedDown { .. } => "imported_down",
      Self::KpiConditions { .. } => "kpi_conditions",
    }
  }

  /// Parse the evaluator for `kind`, consuming its parameters from `doc`.
  fn parse(kind: &str, doc: &mut Facts) -> Result<Self> {
    Ok(match kind {
      "static_message" => Self::StaticMessage,
      "imported_up" => Self::ImportedUp {
        threshold_pct: take_threshold(doc, IMPORTED_UP_DEFAULT_THRESHOLD)?,
      },
      "imported_down" => Self::ImportedDown {
        threshold_pct: take_threshold(doc, IMPORTED_DOWN_DEFAULT_THRESHOLD)?,
      },
      "kpi_conditions" => {
        let raw = doc.remove("conditions").unwrap_or(Value::Null);
        let conditions = if raw.is_null() {
          Vec::new()
        } else {
          serde_json::from_value(raw).map_err(|e| {
            Error::InvalidDefinition(format!("conditions: {e}"))
          })?
        };
        Self::KpiConditions { conditions }
      }
      k if k == "passthrough"
        || PASSTHROUGH_PREFIXES.iter().any(|p| k.starts_with(p)) =>
      {
        Self::Passthrough { kind: k.to_owned() }
      }
      other => Self::Unregistered { kind: other.to_owned() },
    })
  }

  fn write_params(&self, doc: &mut Facts) {
    match self {
      Self::ImportedUp { threshold_pct } | Self::ImportedDown { threshold_pct } => {
        doc.insert("threshold_pct".into(), Value::from(*threshold_pct));
      }
      Self::KpiConditions { conditions } => {
        doc.insert(
          "conditions".into(),
          serde_json::to_value(conditions).unwrap_or(Value::Null),
        );
      }
      _ => {}
    }
  }
}

fn take_threshold(doc: &mut Facts, default: f64) -> Result<f64> {
  match doc.remove("threshold_pct") {
    None | Some(Value::Null) => Ok(default),
    Some(v) => as_number(&v).ok_or_else(|| {
      Error::InvalidDefinition(format!("threshold_pct is not numeric: {v}"))
    }),
  }
}

// ─── Definition ──────────────────────────────────────────────────────────────

/// The parsed, validated `definition` document of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct RuleDefinition {
  pub evaluator:      Evaluator,
  /// Keys that must be present (and non-null) before evaluation.
  pub required_facts: Vec<String>,
  /// Scenario names this rule answers. Empty means never resolvable.
  pub scenarios:      Vec<String>,
  pub dedup_window:   DedupWindow,
  /// Keys not interpreted by the model, preserved verbatim.
  pub extra:          Facts,
}

impl RuleDefinition {
  pub fn new(evaluator: Evaluator, dedup_window: DedupWindow) -> Self {
    Self {
      evaluator,
      required_facts: Vec::new(),
      scenarios: Vec::new(),
      dedup_window,
      extra: Facts::new(),
    }
  }

  pub fn with_scenarios<I, T>(mut self, scenarios: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<String>,
  {
    self.scenarios = scenarios.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_required_facts<I, T>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<String>,
  {
    self.required_facts = keys.into_iter().map(Into::into).collect();
    self
  }

  /// Parse a definition from its JSON document.
  pub fn from_json(value: Value) -> Result<Self> { Self::try_from(value) }

  /// Serialise back to the JSON document form stored alongside the rule.
  pub fn to_json(&self) -> Value { Value::from(self.clone()) }
}

fn take_string_list(doc: &mut Facts, key: &str) -> Result<Vec<String>> {
  match doc.remove(key) {
    None | Some(Value::Null) => Ok(Vec::new()),
    Some(v) => serde_json::from_value(v)
      .map_err(|e| Error::InvalidDefinition(format!("{key}: {e}"))),
  }
}

impl TryFrom<Value> for RuleDefinition {
  type Error = Error;

  fn try_from(value: Value) -> Result<Self> {
    let Value::Object(mut doc) = value else {
      return Err(Error::InvalidDefinition(
        "definition must be a JSON object".into(),
      ));
    };

    let kind = match doc.remove("kind") {
      Some(Value::String(k)) if !k.is_empty() => k,
      _ => return Err(Error::InvalidDefinition("missing kind".into())),
    };

    let dedup_window = match doc.remove("dedup_window") {
      Some(Value::String(w)) => {
        DedupWindow::from_str(w.trim()).map_err(|_| Error::UnknownValue {
          field: "dedup_window",
          value: w,
        })?
      }
      _ => {
        return Err(Error::InvalidDefinition("missing dedup_window".into()));
      }
    };

    let required_facts = take_string_list(&mut doc, "required_facts")?;
    let scenarios = take_string_list(&mut doc, "scenarios")?;
    let evaluator = Evaluator::parse(&kind, &mut doc)?;

    Ok(Self { evaluator, required_facts, scenarios, dedup_window, extra: doc })
  }
}

impl From<RuleDefinition> for Value {
  fn from(def: RuleDefinition) -> Self {
    let mut doc = def.extra;
    doc.insert("kind".into(), Value::from(def.evaluator.kind()));
    doc.insert("dedup_window".into(), Value::from(def.dedup_window.as_ref()));
    doc.insert("required_facts".into(), Value::from(def.required_facts));
    doc.insert("scenarios".into(), Value::from(def.scenarios));
    def.evaluator.write_params(&mut doc);
    Value::Object(doc)
  }
}

// ─── Rule ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
  pub rule_id:    String,
  pub name:       String,
  pub enabled:    bool,
  /// Free-form category, e.g. "energy", "price", "weather".
  pub family:     String,
  #[serde(rename = "type")]
  pub rule_type:  RuleType,
  pub severity:   Severity,
  pub version:    i64,
  pub definition: RuleDefinition,
}

impl Rule {
  pub fn new(
    rule_id: impl Into<String>,
    family: impl Into<String>,
    definition: RuleDefinition,
  ) -> Self {
    let rule_id = rule_id.into();
    Self {
      name: rule_id.clone(),
      rule_id,
      enabled: true,
      family: family.into(),
      rule_type: RuleType::Informative,
      severity: Severity::Info,
      version: 1,
      definition,
    }
  }

  /// Whether this rule's definition lists `scenario`.
  pub fn declares(&self, scenario: &str) -> bool {
    self.definition.scenarios.iter().any(|s| s == scenario)
  }

  /// Apply a per-community override, returning the effective rule.
  ///
  /// The override's definition is merged key-by-key over the base document
  /// and the result is re-validated.
  pub fn with_override(&self, ov: &RuleOverride) -> Result<Rule> {
    let mut rule = self.clone();
    if let Some(enabled) = ov.enabled_override {
      rule.enabled = enabled;
    }
    if !ov.definition_override.is_empty() {
      let Value::Object(mut doc) = self.definition.to_json() else {
        unreachable!("definitions always serialise to an object");
      };
      for (k, v) in &ov.definition_override {
        doc.insert(k.clone(), v.clone());
      }
      rule.definition = RuleDefinition::try_from(Value::Object(doc))?;
    }
    Ok(rule)
  }
}

// ─── Overrides ───────────────────────────────────────────────────────────────

/// Per-community adjustments to a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOverride {
  pub rule_id:             String,
  pub community_id:        String,
  pub enabled_override:    Option<bool>,
  #[serde(default)]
  pub definition_override: Facts,
}
