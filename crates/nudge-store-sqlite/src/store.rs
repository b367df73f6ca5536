//! [`SqliteStore`], the SQLite implementation of [`NudgeStore`].

use std::path::Path;

use chrono::{NaiveDate, Utc};
use nudge_core::{
  nudge::{
    CreateOutcome, DeliveryLog, NewNotification, NewNudgeLog, Notification,
    NotificationStatus, NudgeLog,
  },
  preference::{Channel, UserPreference},
  rule::{Rule, RuleOverride},
  store::NudgeStore,
  template::Template,
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    DELIVERY_COLUMNS, NOTIFICATION_COLUMNS, NUDGE_COLUMNS, RawDelivery,
    RawNotification, RawNudge, RawOverride, RawPreference, RawRule,
    encode_day, encode_dt, encode_object, preference_key, template_from_row,
  },
  schema::SCHEMA,
};

/// Whether `err` is a UNIQUE constraint violation.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _)
      if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
  )
}

fn new_id() -> String { Uuid::new_v4().simple().to_string() }

// ─── Store ───────────────────────────────────────────────────────────────────

/// A nudge store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Reference-data writes ─────────────────────────────────────────────────
  //
  // Not part of `NudgeStore`: the engine never writes reference data. These
  // exist for seeding tools and tests.

  /// Insert or replace a rule. The definition is already validated by its
  /// type; it is stored in document form.
  pub async fn upsert_rule(&self, rule: &Rule) -> Result<()> {
    let rule_id    = rule.rule_id.clone();
    let name       = rule.name.clone();
    let enabled    = rule.enabled;
    let family     = rule.family.clone();
    let rule_type  = rule.rule_type.as_ref().to_owned();
    let severity   = rule.severity.as_ref().to_owned();
    let definition = rule.definition.to_json().to_string();
    let version    = rule.version;
    let now        = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO rules (
             rule_id, name, enabled, family, rule_type, severity,
             definition, version, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
           ON CONFLICT (rule_id) DO UPDATE SET
             name = excluded.name,
             enabled = excluded.enabled,
             family = excluded.family,
             rule_type = excluded.rule_type,
             severity = excluded.severity,
             definition = excluded.definition,
             version = excluded.version,
             updated_at = excluded.updated_at",
          rusqlite::params![
            rule_id, name, enabled, family, rule_type, severity, definition,
            version, now,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert or replace the override for `(rule_id, community_id)`.
  pub async fn upsert_override(&self, ov: &RuleOverride) -> Result<()> {
    let override_id  = new_id();
    let rule_id      = ov.rule_id.clone();
    let community_id = ov.community_id.clone();
    let enabled      = ov.enabled_override;
    let definition   = encode_object(&ov.definition_override)?;
    let now          = encode_dt(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        let exists = conn
          .query_row(
            "SELECT 1 FROM rules WHERE rule_id = ?1",
            rusqlite::params![rule_id],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if !exists {
          return Ok(false);
        }
        conn.execute(
          "INSERT INTO rule_overrides (
             override_id, rule_id, community_id, enabled_override,
             definition_override, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
           ON CONFLICT (rule_id, community_id) DO UPDATE SET
             enabled_override = excluded.enabled_override,
             definition_override = excluded.definition_override,
             updated_at = excluded.updated_at",
          rusqlite::params![
            override_id, rule_id, community_id, enabled, definition, now,
          ],
        )?;
        Ok(true)
      })
      .await?;

    if !inserted {
      return Err(Error::RuleNotFound(ov.rule_id.clone()));
    }
    Ok(())
  }

  /// Insert or replace the template for `(rule_id, lang)`.
  pub async fn upsert_template(&self, template: &Template) -> Result<()> {
    let t = template.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO templates (template_id, rule_id, lang, title_jinja, body_jinja)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (rule_id, lang) DO UPDATE SET
             title_jinja = excluded.title_jinja,
             body_jinja = excluded.body_jinja",
          rusqlite::params![
            t.template_id, t.rule_id, t.lang, t.title_jinja, t.body_jinja,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert or replace the preference row for `(user_id, community_id)`.
  pub async fn upsert_preference(&self, pref: &UserPreference) -> Result<()> {
    let key      = preference_key(&pref.user_id, pref.community_id.as_deref());
    let p        = pref.clone();
    let consents = encode_object(&pref.consents)?;
    let at       = encode_dt(pref.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO user_preferences (
             pref_key, user_id, community_id, lang,
             channel_web, channel_email, channel_telegram, channel_whatsapp,
             email, telegram_chat_id, whatsapp_phone,
             max_per_day, consents, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
           ON CONFLICT (pref_key) DO UPDATE SET
             lang = excluded.lang,
             channel_web = excluded.channel_web,
             channel_email = excluded.channel_email,
             channel_telegram = excluded.channel_telegram,
             channel_whatsapp = excluded.channel_whatsapp,
             email = excluded.email,
             telegram_chat_id = excluded.telegram_chat_id,
             whatsapp_phone = excluded.whatsapp_phone,
             max_per_day = excluded.max_per_day,
             consents = excluded.consents,
             updated_at = excluded.updated_at",
          rusqlite::params![
            key,
            p.user_id,
            p.community_id,
            p.lang,
            p.channel_web,
            p.channel_email,
            p.channel_telegram,
            p.channel_whatsapp,
            p.email,
            p.telegram_chat_id,
            p.whatsapp_phone,
            p.max_per_day,
            consents,
            at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert a nudge row. `created` rows conflict on their dedup key; the
  /// conflict is reported as `Ok(None)` after rolling back.
  async fn insert_nudge(
    &self,
    input: NewNudgeLog,
    notification: Option<NewNotification>,
  ) -> Result<Option<(NudgeLog, Option<Notification>)>> {
    let now = Utc::now();
    let nudge = NudgeLog {
      nudge_id:     new_id(),
      rule_id:      input.rule_id,
      user_id:      input.user_id,
      community_id: input.community_id,
      dedup_key:    input.dedup_key,
      status:       input.status,
      payload:      input.payload,
      created_at:   now,
    };
    let notification = notification.map(|n| Notification {
      notification_id: new_id(),
      nudge_id:        nudge.nudge_id.clone(),
      rule_id:         nudge.rule_id.clone(),
      user_id:         nudge.user_id.clone(),
      community_id:    nudge.community_id.clone(),
      family:          n.family,
      rule_type:       n.rule_type,
      severity:        n.severity,
      title:           n.title,
      body:            n.body,
      status:          NotificationStatus::Pending,
      created_at:      now,
      read_at:         None,
      deleted_at:      None,
    });

    let nudge_params = (
      nudge.nudge_id.clone(),
      nudge.rule_id.clone(),
      nudge.user_id.clone(),
      nudge.community_id.clone(),
      nudge.dedup_key.clone(),
      nudge.status.as_ref().to_owned(),
      encode_object(&nudge.payload)?,
      encode_dt(now),
    );
    let notification_params = notification.as_ref().map(|n| {
      (
        n.notification_id.clone(),
        n.family.clone(),
        n.rule_type.as_ref().to_owned(),
        n.severity.as_ref().to_owned(),
        n.title.clone(),
        n.body.clone(),
        n.status.as_ref().to_owned(),
      )
    });

    let inserted = self
      .conn
      .call(move |conn| {
        let (nudge_id, rule_id, user_id, community_id, dedup_key, status, payload, at) =
          nudge_params;
        let tx = conn.transaction()?;

        let res = tx.execute(
          &format!(
            "INSERT INTO nudge_logs ({NUDGE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
          ),
          rusqlite::params![
            nudge_id, rule_id, user_id, community_id, dedup_key, status,
            payload, at,
          ],
        );
        match res {
          Err(e) if is_unique_violation(&e) => return Ok(false),
          other => {
            other?;
          }
        }

        if let Some((notification_id, family, rule_type, severity, title, body, n_status)) =
          notification_params
        {
          tx.execute(
            &format!(
              "INSERT INTO notifications ({NOTIFICATION_COLUMNS})
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL, NULL)"
            ),
            rusqlite::params![
              notification_id,
              nudge_id,
              rule_id,
              user_id,
              community_id,
              family,
              rule_type,
              severity,
              title,
              body,
              n_status,
              at,
            ],
          )?;
        }

        tx.commit()?;
        Ok(true)
      })
      .await?;

    Ok(inserted.then_some((nudge, notification)))
  }
}

// ─── NudgeStore impl ─────────────────────────────────────────────────────────

impl NudgeStore for SqliteStore {
  type Error = Error;

  // ── Reference data ────────────────────────────────────────────────────────

  async fn list_rules(&self) -> Result<Vec<Rule>> {
    let raws: Vec<RawRule> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT rule_id, name, enabled, family, rule_type, severity,
                  definition, version
           FROM rules ORDER BY rule_id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawRule {
              rule_id:    row.get(0)?,
              name:       row.get(1)?,
              enabled:    row.get(2)?,
              family:     row.get(3)?,
              rule_type:  row.get(4)?,
              severity:   row.get(5)?,
              definition: row.get(6)?,
              version:    row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut rules = Vec::with_capacity(raws.len());
    for raw in raws {
      let rule_id = raw.rule_id.clone();
      match raw.into_rule() {
        Ok(rule) => rules.push(rule),
        Err(error) => {
          tracing::warn!(%rule_id, %error, "skipping rule with invalid definition");
        }
      }
    }
    Ok(rules)
  }

  async fn list_overrides(&self, community_id: &str) -> Result<Vec<RuleOverride>> {
    let community_id = community_id.to_owned();

    let raws: Vec<RawOverride> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT rule_id, community_id, enabled_override, definition_override
           FROM rule_overrides WHERE community_id = ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![community_id], |row| {
            Ok(RawOverride {
              rule_id:             row.get(0)?,
              community_id:        row.get(1)?,
              enabled_override:    row.get(2)?,
              definition_override: row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOverride::into_override).collect()
  }

  async fn get_template(&self, rule_id: &str, lang: &str) -> Result<Option<Template>> {
    let rule_id = rule_id.to_owned();
    let lang = lang.to_owned();

    let template = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT template_id, rule_id, lang, title_jinja, body_jinja
             FROM templates WHERE rule_id = ?1 AND lang = ?2",
            rusqlite::params![rule_id, lang],
            template_from_row,
          )
          .optional()?)
      })
      .await?;
    Ok(template)
  }

  async fn get_preference(
    &self,
    user_id:      &str,
    community_id: Option<&str>,
  ) -> Result<Option<UserPreference>> {
    let user_id = user_id.to_owned();
    let community_id = community_id.map(str::to_owned);

    let raw: Option<RawPreference> = self
      .conn
      .call(move |conn| {
        // A NULL ?2 matches no community row, leaving only the fallback.
        Ok(conn
          .query_row(
            "SELECT user_id, community_id, lang,
                    channel_web, channel_email, channel_telegram, channel_whatsapp,
                    email, telegram_chat_id, whatsapp_phone,
                    max_per_day, consents, updated_at
             FROM user_preferences
             WHERE user_id = ?1
               AND (community_id = ?2 OR community_id IS NULL)
             ORDER BY community_id IS NULL ASC
             LIMIT 1",
            rusqlite::params![user_id, community_id],
            |row| {
              Ok(RawPreference {
                user_id:          row.get(0)?,
                community_id:     row.get(1)?,
                lang:             row.get(2)?,
                channel_web:      row.get(3)?,
                channel_email:    row.get(4)?,
                channel_telegram: row.get(5)?,
                channel_whatsapp: row.get(6)?,
                email:            row.get(7)?,
                telegram_chat_id: row.get(8)?,
                whatsapp_phone:   row.get(9)?,
                max_per_day:      row.get(10)?,
                consents:         row.get(11)?,
                updated_at:       row.get(12)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawPreference::into_preference).transpose()
  }

  // ── Audit writes ──────────────────────────────────────────────────────────

  async fn record_attempt(&self, input: NewNudgeLog) -> Result<NudgeLog> {
    let dedup_key = input.dedup_key.clone();
    match self.insert_nudge(input, None).await? {
      Some((nudge, _)) => Ok(nudge),
      // Attempt keys carry a random suffix; a collision here means the
      // caller passed a real dedup key by mistake.
      None => Err(Error::KeyConflict(dedup_key)),
    }
  }

  async fn create_notification(
    &self,
    nudge:        NewNudgeLog,
    notification: NewNotification,
  ) -> Result<CreateOutcome> {
    Ok(match self.insert_nudge(nudge, Some(notification)).await? {
      Some((nudge, Some(notification))) => {
        CreateOutcome::Created { nudge, notification }
      }
      _ => CreateOutcome::Duplicate,
    })
  }

  // ── Delivery ──────────────────────────────────────────────────────────────

  async fn get_nudge(&self, nudge_id: &str) -> Result<Option<NudgeLog>> {
    let nudge_id = nudge_id.to_owned();

    let raw: Option<RawNudge> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {NUDGE_COLUMNS} FROM nudge_logs WHERE nudge_id = ?1"),
            rusqlite::params![nudge_id],
            RawNudge::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawNudge::into_nudge).transpose()
  }

  async fn get_notification(&self, nudge_id: &str) -> Result<Option<Notification>> {
    let nudge_id = nudge_id.to_owned();

    let raw: Option<RawNotification> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE nudge_id = ?1"
            ),
            rusqlite::params![nudge_id],
            RawNotification::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawNotification::into_notification).transpose()
  }

  async fn count_sent_on(
    &self,
    user_id:      &str,
    community_id: Option<&str>,
    channel:      Channel,
    day:          NaiveDate,
  ) -> Result<u32> {
    let user_id = user_id.to_owned();
    let community_id = community_id.map(str::to_owned);
    let channel = channel.as_ref().to_owned();
    let day = encode_day(day);

    let count = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM delivery_logs
           WHERE user_id = ?1
             AND status = 'sent'
             AND substr(sent_at, 1, 10) = ?2
             AND (?3 IS NULL OR community_id = ?3)
             AND channel = ?4",
          rusqlite::params![user_id, day, community_id, channel],
          |row| row.get::<_, u32>(0),
        )?)
      })
      .await?;
    Ok(count)
  }

  async fn complete_delivery(
    &self,
    notification_id: String,
    deliveries:      Vec<DeliveryLog>,
    status:          NotificationStatus,
  ) -> Result<bool> {
    let rows: Vec<RawDelivery> = deliveries.iter().map(RawDelivery::encode).collect();
    let status = status.as_ref().to_owned();

    let applied = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let updated = tx.execute(
          "UPDATE notifications SET status = ?2
           WHERE notification_id = ?1 AND status = 'pending'",
          rusqlite::params![notification_id, status],
        )?;
        if updated == 0 {
          return Ok(false);
        }

        for d in rows {
          tx.execute(
            &format!(
              "INSERT INTO delivery_logs ({DELIVERY_COLUMNS})
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            rusqlite::params![
              d.delivery_id,
              d.nudge_id,
              d.user_id,
              d.community_id,
              d.channel,
              d.destination,
              d.status,
              d.error,
              d.created_at,
              d.sent_at,
            ],
          )?;
        }

        tx.commit()?;
        Ok(true)
      })
      .await?;
    Ok(applied)
  }

  // ── Audit reads ───────────────────────────────────────────────────────────

  async fn list_nudges(&self, user_id: &str) -> Result<Vec<NudgeLog>> {
    let user_id = user_id.to_owned();

    let raws: Vec<RawNudge> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {NUDGE_COLUMNS} FROM nudge_logs
           WHERE user_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![user_id], RawNudge::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawNudge::into_nudge).collect()
  }

  async fn list_deliveries(&self, nudge_id: &str) -> Result<Vec<DeliveryLog>> {
    let nudge_id = nudge_id.to_owned();

    let raws: Vec<RawDelivery> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {DELIVERY_COLUMNS} FROM delivery_logs
           WHERE nudge_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![nudge_id], RawDelivery::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDelivery::into_delivery).collect()
  }
}
