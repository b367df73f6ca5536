//! The minimal contract every fact bundle must satisfy before any rule is
//! looked at.

use nudge_core::event::{Facts, non_empty_str};

/// The two keys the engine cannot proceed without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contract<'a> {
  pub facts_version: &'a str,
  pub scenario:      &'a str,
}

/// Check that `facts` carries a non-empty string `facts_version` and a
/// non-empty string `scenario`.
///
/// On failure every violated clause is reported, in a fixed order.
pub fn validate(facts: &Facts) -> Result<Contract<'_>, Vec<String>> {
  let facts_version = non_empty_str(facts, "facts_version");
  let scenario = non_empty_str(facts, "scenario");

  match (facts_version, scenario) {
    (Some(facts_version), Some(scenario)) => {
      Ok(Contract { facts_version, scenario })
    }
    _ => {
      let mut errors = Vec::new();
      if facts_version.is_none() {
        errors.push("missing facts_version".to_owned());
      }
      if scenario.is_none() {
        errors.push("missing scenario".to_owned());
      }
      Err(errors)
    }
  }
}
