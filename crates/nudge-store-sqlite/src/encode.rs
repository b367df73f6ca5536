//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, so the first ten characters of
//! any timestamp column are its UTC calendar date. JSON documents
//! (definitions, payloads, consents) are stored as compact JSON text. Enums
//! are stored by their lowercase names.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use nudge_core::{
  event::Facts,
  nudge::{DeliveryLog, Notification, NudgeLog},
  preference::UserPreference,
  rule::{Rule, RuleDefinition, RuleOverride},
  template::Template,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

pub fn encode_day(day: NaiveDate) -> String { day.format("%Y-%m-%d").to_string() }

// ─── Enums ───────────────────────────────────────────────────────────────────

/// Parse a stored enum name, naming the column on failure.
pub fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| Error::UnknownValue { column, value: s.to_owned() })
}

// ─── JSON objects ────────────────────────────────────────────────────────────

pub fn encode_object(doc: &Facts) -> Result<String> {
  Ok(serde_json::to_string(doc)?)
}

pub fn decode_object(s: &str) -> Result<Facts> { Ok(serde_json::from_str(s)?) }

/// Storage key for a preference row: one per `(user, community-or-none)`.
pub fn preference_key(user_id: &str, community_id: Option<&str>) -> String {
  format!("{user_id}\u{1f}{}", community_id.unwrap_or_default())
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `rules` row.
pub struct RawRule {
  pub rule_id:    String,
  pub name:       String,
  pub enabled:    bool,
  pub family:     String,
  pub rule_type:  String,
  pub severity:   String,
  pub definition: String,
  pub version:    i64,
}

impl RawRule {
  pub fn into_rule(self) -> Result<Rule> {
    let doc: serde_json::Value = serde_json::from_str(&self.definition)?;
    Ok(Rule {
      rule_id:    self.rule_id,
      name:       self.name,
      enabled:    self.enabled,
      family:     self.family,
      rule_type:  decode_enum("rule_type", &self.rule_type)?,
      severity:   decode_enum("severity", &self.severity)?,
      version:    self.version,
      definition: RuleDefinition::from_json(doc)?,
    })
  }
}

pub struct RawOverride {
  pub rule_id:             String,
  pub community_id:        String,
  pub enabled_override:    Option<bool>,
  pub definition_override: String,
}

impl RawOverride {
  pub fn into_override(self) -> Result<RuleOverride> {
    Ok(RuleOverride {
      rule_id:             self.rule_id,
      community_id:        self.community_id,
      enabled_override:    self.enabled_override,
      definition_override: decode_object(&self.definition_override)?,
    })
  }
}

pub fn template_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Template> {
  Ok(Template {
    template_id: row.get(0)?,
    rule_id:     row.get(1)?,
    lang:        row.get(2)?,
    title_jinja: row.get(3)?,
    body_jinja:  row.get(4)?,
  })
}

pub struct RawPreference {
  pub user_id:          String,
  pub community_id:     Option<String>,
  pub lang:             String,
  pub channel_web:      bool,
  pub channel_email:    bool,
  pub channel_telegram: bool,
  pub channel_whatsapp: bool,
  pub email:            Option<String>,
  pub telegram_chat_id: Option<String>,
  pub whatsapp_phone:   Option<String>,
  pub max_per_day:      u32,
  pub consents:         String,
  pub updated_at:       String,
}

impl RawPreference {
  pub fn into_preference(self) -> Result<UserPreference> {
    Ok(UserPreference {
      user_id:          self.user_id,
      community_id:     self.community_id,
      lang:             self.lang,
      channel_web:      self.channel_web,
      channel_email:    self.channel_email,
      channel_telegram: self.channel_telegram,
      channel_whatsapp: self.channel_whatsapp,
      email:            self.email,
      telegram_chat_id: self.telegram_chat_id,
      whatsapp_phone:   self.whatsapp_phone,
      max_per_day:      self.max_per_day,
      consents:         decode_object(&self.consents)?,
      updated_at:       decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `nudge_logs` row.
pub struct RawNudge {
  pub nudge_id:     String,
  pub rule_id:      String,
  pub user_id:      String,
  pub community_id: Option<String>,
  pub dedup_key:    String,
  pub status:       String,
  pub payload:      String,
  pub created_at:   String,
}

pub const NUDGE_COLUMNS: &str = "nudge_id, rule_id, user_id, community_id, \
                                 dedup_key, status, payload, created_at";

impl RawNudge {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      nudge_id:     row.get(0)?,
      rule_id:      row.get(1)?,
      user_id:      row.get(2)?,
      community_id: row.get(3)?,
      dedup_key:    row.get(4)?,
      status:       row.get(5)?,
      payload:      row.get(6)?,
      created_at:   row.get(7)?,
    })
  }

  pub fn into_nudge(self) -> Result<NudgeLog> {
    Ok(NudgeLog {
      nudge_id:     self.nudge_id,
      rule_id:      self.rule_id,
      user_id:      self.user_id,
      community_id: self.community_id,
      dedup_key:    self.dedup_key,
      status:       decode_enum("status", &self.status)?,
      payload:      decode_object(&self.payload)?,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `notifications` row.
pub struct RawNotification {
  pub notification_id: String,
  pub nudge_id:        String,
  pub rule_id:         String,
  pub user_id:         String,
  pub community_id:    Option<String>,
  pub family:          String,
  pub rule_type:       String,
  pub severity:        String,
  pub title:           String,
  pub body:            String,
  pub status:          String,
  pub created_at:      String,
  pub read_at:         Option<String>,
  pub deleted_at:      Option<String>,
}

pub const NOTIFICATION_COLUMNS: &str =
  "notification_id, nudge_id, rule_id, user_id, community_id, family, \
   rule_type, severity, title, body, status, created_at, read_at, deleted_at";

impl RawNotification {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      notification_id: row.get(0)?,
      nudge_id:        row.get(1)?,
      rule_id:         row.get(2)?,
      user_id:         row.get(3)?,
      community_id:    row.get(4)?,
      family:          row.get(5)?,
      rule_type:       row.get(6)?,
      severity:        row.get(7)?,
      title:           row.get(8)?,
      body:            row.get(9)?,
      status:          row.get(10)?,
      created_at:      row.get(11)?,
      read_at:         row.get(12)?,
      deleted_at:      row.get(13)?,
    })
  }

  pub fn into_notification(self) -> Result<Notification> {
    Ok(Notification {
      notification_id: self.notification_id,
      nudge_id:        self.nudge_id,
      rule_id:         self.rule_id,
      user_id:         self.user_id,
      community_id:    self.community_id,
      family:          self.family,
      rule_type:       decode_enum("rule_type", &self.rule_type)?,
      severity:        decode_enum("severity", &self.severity)?,
      title:           self.title,
      body:            self.body,
      status:          decode_enum("status", &self.status)?,
      created_at:      decode_dt(&self.created_at)?,
      read_at:         decode_opt_dt(self.read_at)?,
      deleted_at:      decode_opt_dt(self.deleted_at)?,
    })
  }
}

/// Raw strings for a `delivery_logs` row, used in both directions.
pub struct RawDelivery {
  pub delivery_id:  String,
  pub nudge_id:     String,
  pub user_id:      String,
  pub community_id: Option<String>,
  pub channel:      String,
  pub destination:  String,
  pub status:       String,
  pub error:        Option<String>,
  pub created_at:   String,
  pub sent_at:      Option<String>,
}

pub const DELIVERY_COLUMNS: &str = "delivery_id, nudge_id, user_id, community_id, \
                                    channel, destination, status, error, \
                                    created_at, sent_at";

impl RawDelivery {
  pub fn encode(d: &DeliveryLog) -> Self {
    Self {
      delivery_id:  d.delivery_id.clone(),
      nudge_id:     d.nudge_id.clone(),
      user_id:      d.user_id.clone(),
      community_id: d.community_id.clone(),
      channel:      d.channel.as_ref().to_owned(),
      destination:  d.destination.clone(),
      status:       d.status.as_ref().to_owned(),
      error:        d.error.clone(),
      created_at:   encode_dt(d.created_at),
      sent_at:      d.sent_at.map(encode_dt),
    }
  }

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      delivery_id:  row.get(0)?,
      nudge_id:     row.get(1)?,
      user_id:      row.get(2)?,
      community_id: row.get(3)?,
      channel:      row.get(4)?,
      destination:  row.get(5)?,
      status:       row.get(6)?,
      error:        row.get(7)?,
      created_at:   row.get(8)?,
      sent_at:      row.get(9)?,
    })
  }

  pub fn into_delivery(self) -> Result<DeliveryLog> {
    Ok(DeliveryLog {
      delivery_id:  self.delivery_id,
      nudge_id:     self.nudge_id,
      user_id:      self.user_id,
      community_id: self.community_id,
      channel:      decode_enum("channel", &self.channel)?,
      destination:  self.destination,
      status:       decode_enum("status", &self.status)?,
      error:        self.error,
      created_at:   decode_dt(&self.created_at)?,
      sent_at:      decode_opt_dt(self.sent_at)?,
    })
  }
}
