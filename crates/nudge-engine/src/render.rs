//! Minijinja rendering of notification titles and bodies.
//!
//! Templates are stored strings, so a fresh [`minijinja::Environment`] is
//! built per render.

use chrono::{DateTime, SecondsFormat, Utc};
use nudge_core::{event::Facts, template::Template};
use serde_json::Value;

use crate::error::RenderError;

/// A rendered title and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
  pub title: String,
  pub body:  String,
}

/// Build the rendering context: `now`, `user_id` and `community_id`, then
/// every fact. Facts win on key collisions.
pub fn context(
  now: DateTime<Utc>,
  user_id: &str,
  community_id: Option<&str>,
  facts: &Facts,
) -> Facts {
  let mut ctx = Facts::new();
  ctx.insert("now".into(), Value::from(now.to_rfc3339_opts(SecondsFormat::Secs, true)));
  ctx.insert("user_id".into(), Value::from(user_id));
  ctx.insert("community_id".into(), community_id.map_or(Value::Null, Value::from));
  for (k, v) in facts {
    ctx.insert(k.clone(), v.clone());
  }
  ctx
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Renderer;

impl Renderer {
  pub fn new() -> Self { Self }

  fn build_env() -> minijinja::Environment<'static> {
    let mut env = minijinja::Environment::new();
    env.add_filter("pct", pct_filter);
    env
  }

  /// Render both halves of `template` against `ctx`.
  pub fn render(&self, template: &Template, ctx: &Facts) -> Result<Rendered, RenderError> {
    let env = Self::build_env();
    let title = env
      .render_str(&template.title_jinja, ctx)
      .map_err(|e| RenderError(format!("title: {e}")))?;
    let body = env
      .render_str(&template.body_jinja, ctx)
      .map_err(|e| RenderError(format!("body: {e}")))?;
    Ok(Rendered { title, body })
  }
}

/// `{{ delta_pct | pct }}` → `25.0%`; an optional argument sets the number
/// of decimals.
fn pct_filter(value: f64, decimals: Option<u32>) -> String {
  let n = decimals.unwrap_or(1) as usize;
  format!("{value:.n$}%")
}
