//! Time bucketing of fact bundles.
//!
//! The first non-empty string among `time`, `date`, `week` and `period` is
//! classified by shape:
//!
//! | Shape           | Frequency | Mirrored into |
//! |-----------------|-----------|---------------|
//! | `YYYY-MM-DDTHH` | hourly    | `hour`        |
//! | `YYYY-MM-DD`    | daily     | `date`        |
//! | `YYYY-Www`      | weekly    | `week`        |
//! | `YYYY-MM`       | monthly   | `period`      |
//! | `YYYY`          | yearly    | `period`      |
//!
//! The canonical value is always mirrored into `time` as well.

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use nudge_core::{event::Facts, rule::Frequency};
use serde_json::Value;

/// Fact keys consulted for the time bucket, highest priority first.
pub const TIME_KEYS: [&str; 4] = ["time", "date", "week", "period"];

/// A classified time bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeScope {
  pub frequency: Frequency,
  /// The canonical bucket value, e.g. `2026-02-24` or `2026-W08`.
  pub scope:     String,
}

/// The fact key a frequency's canonical value is mirrored into.
pub fn field_for(frequency: Frequency) -> &'static str {
  match frequency {
    Frequency::Hourly => "hour",
    Frequency::Daily => "date",
    Frequency::Weekly => "week",
    Frequency::Monthly | Frequency::Yearly => "period",
  }
}

/// Infer the time bucket of `facts`, or `None` if no time key holds a
/// recognisable value.
pub fn infer(facts: &Facts) -> Option<TimeScope> {
  let raw = TIME_KEYS.iter().find_map(|k| {
    facts
      .get(*k)
      .and_then(Value::as_str)
      .map(str::trim)
      .filter(|s| !s.is_empty())
  })?;

  let frequency = classify(raw)?;
  Some(TimeScope { frequency, scope: raw.to_owned() })
}

/// A copy of `facts` with the canonical value written into `time` and the
/// frequency's own key.
pub fn normalize(facts: &Facts, ts: &TimeScope) -> Facts {
  let mut out = facts.clone();
  out.insert("time".into(), Value::from(ts.scope.as_str()));
  out.insert(field_for(ts.frequency).into(), Value::from(ts.scope.as_str()));
  out
}

/// The bucket containing `now` at the given granularity.
pub fn current_scope(frequency: Frequency, now: DateTime<Utc>) -> String {
  let fmt = match frequency {
    Frequency::Hourly => "%Y-%m-%dT%H",
    Frequency::Daily => "%Y-%m-%d",
    Frequency::Weekly => "%G-W%V",
    Frequency::Monthly => "%Y-%m",
    Frequency::Yearly => "%Y",
  };
  now.format(fmt).to_string()
}

// ─── Shape classification ────────────────────────────────────────────────────

fn classify(raw: &str) -> Option<Frequency> {
  let b = raw.as_bytes();
  match b.len() {
    4 if digits(b) => Some(Frequency::Yearly),
    7 if b[4] == b'-' && digits(&b[..4]) && month(&b[5..7]) => {
      Some(Frequency::Monthly)
    }
    8 if &b[4..6] == b"-W" && iso_week(&raw[..4], &b[6..8]) => {
      Some(Frequency::Weekly)
    }
    10 if date(raw) => Some(Frequency::Daily),
    13 if b[10] == b'T' && date(&raw[..10]) && hour(&b[11..13]) => {
      Some(Frequency::Hourly)
    }
    _ => None,
  }
}

fn digits(b: &[u8]) -> bool { b.iter().all(u8::is_ascii_digit) }

fn two_digit(b: &[u8]) -> Option<u32> {
  digits(b).then(|| u32::from(b[0] - b'0') * 10 + u32::from(b[1] - b'0'))
}

fn month(b: &[u8]) -> bool { two_digit(b).is_some_and(|m| (1..=12).contains(&m)) }

/// Week 53 only exists in long ISO years.
fn iso_week(year: &str, week: &[u8]) -> bool {
  let Some(w) = two_digit(week) else { return false };
  digits(year.as_bytes())
    && year
      .parse::<i32>()
      .is_ok_and(|y| NaiveDate::from_isoywd_opt(y, w, Weekday::Mon).is_some())
}

fn hour(b: &[u8]) -> bool { two_digit(b).is_some_and(|h| h < 24) }

fn date(s: &str) -> bool {
  let b = s.as_bytes();
  b.len() == 10
    && b[4] == b'-'
    && b[7] == b'-'
    && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
