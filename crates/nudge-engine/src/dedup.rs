//! Dedup scopes and keys.
//!
//! A dedup key names one logical occurrence of a rule for a user (and
//! community). The store's unique index on the key is what admits at most
//! one `created` row per occurrence; nothing here checks for existing rows.

use chrono::{DateTime, Utc};
use nudge_core::{
  event::{Facts, non_empty_str},
  rule::DedupWindow,
};
use uuid::Uuid;

use crate::time_scope::{current_scope, field_for};

/// Rule id recorded on attempts that failed before any rule was chosen.
pub const NO_RULE: &str = "__no_rule__";
/// Scope recorded on attempts that failed before a scope was known.
pub const NO_SCOPE: &str = "__no_scope__";

/// The scope segment of a dedup key.
///
/// `always` yields a fresh random scope so every occurrence is distinct;
/// `once` pins a single scope forever. Time windows use the normalized fact
/// for their granularity, or the current UTC bucket when it is absent.
pub fn dedup_scope(window: DedupWindow, facts: &Facts, now: DateTime<Utc>) -> String {
  match window.frequency() {
    None if window == DedupWindow::Always => Uuid::new_v4().simple().to_string(),
    None => "once".to_owned(),
    Some(freq) => non_empty_str(facts, field_for(freq))
      .map(str::to_owned)
      .unwrap_or_else(|| current_scope(freq, now)),
  }
}

pub fn dedup_key(
  rule_id: &str,
  user_id: &str,
  community_id: Option<&str>,
  scope: &str,
) -> String {
  format!("{rule_id}:{user_id}:{}:{scope}", community_id.unwrap_or_default())
}

/// A unique key for a non-created audit row. Never collides with a real
/// dedup key or with another attempt.
pub fn attempt_key(
  rule_id: &str,
  user_id: &str,
  community_id: Option<&str>,
  scope: &str,
) -> String {
  format!(
    "attempt:{}:{}",
    dedup_key(rule_id, user_id, community_id, scope),
    Uuid::new_v4().simple()
  )
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use serde_json::json;

  use super::*;

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 2, 24, 7, 0, 0).unwrap() }

  #[test]
  fn always_scopes_are_distinct() {
    let a = dedup_scope(DedupWindow::Always, &Facts::new(), now());
    let b = dedup_scope(DedupWindow::Always, &Facts::new(), now());
    assert_ne!(a, b);
  }

  #[test]
  fn once_scope_is_fixed() {
    assert_eq!(dedup_scope(DedupWindow::Once, &Facts::new(), now()), "once");
  }

  #[test]
  fn time_windows_read_their_own_field() {
    let facts = json!({ "date": "2026-02-20", "week": "2026-W08", "period": "2026" })
      .as_object()
      .cloned()
      .unwrap();
    assert_eq!(dedup_scope(DedupWindow::Daily, &facts, now()), "2026-02-20");
    assert_eq!(dedup_scope(DedupWindow::Weekly, &facts, now()), "2026-W08");
    assert_eq!(dedup_scope(DedupWindow::Yearly, &facts, now()), "2026");
  }

  #[test]
  fn time_windows_fall_back_to_current_bucket() {
    assert_eq!(dedup_scope(DedupWindow::Monthly, &Facts::new(), now()), "2026-02");
    assert_eq!(dedup_scope(DedupWindow::Hourly, &Facts::new(), now()), "2026-02-24T07");
  }

  #[test]
  fn keys() {
    assert_eq!(dedup_key("r", "u", Some("c"), "2026-02-24"), "r:u:c:2026-02-24");
    assert_eq!(dedup_key("r", "u", None, "once"), "r:u::once");

    let a = attempt_key("r", "u", None, "once");
    assert!(a.starts_with("attempt:r:u::once:"));
    assert_ne!(a, attempt_key("r", "u", None, "once"));
  }
}
