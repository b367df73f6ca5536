//! Localized content templates.

use serde::{Deserialize, Serialize};

/// Language used when a rule has no template in the requested one.
pub const FALLBACK_LANG: &str = "en";

/// Title and body templates for one rule in one language. Unique on
/// `(rule_id, lang)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
  pub template_id: String,
  pub rule_id:     String,
  pub lang:        String,
  pub title_jinja: String,
  pub body_jinja:  String,
}

impl Template {
  pub fn new(
    rule_id: impl Into<String>,
    lang: impl Into<String>,
    title_jinja: impl Into<String>,
    body_jinja: impl Into<String>,
  ) -> Self {
    let rule_id = rule_id.into();
    let lang = lang.into();
    Self {
      template_id: format!("{rule_id}:{lang}"),
      rule_id,
      lang,
      title_jinja: title_jinja.into(),
      body_jinja: body_jinja.into(),
    }
  }
}
