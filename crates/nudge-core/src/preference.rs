//! Per-user delivery preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Facts;

/// Sends allowed per user per day when no preference row exists.
pub const DEFAULT_MAX_PER_DAY: u32 = 3;

/// A delivery channel a notification can be published on.
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
  strum::EnumString,
  strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
  Web,
  Email,
  Telegram,
  Whatsapp,
}

/// Delivery settings for a user, optionally scoped to one community.
///
/// A row with `community_id = None` is the user's generic fallback; a
/// community-scoped row takes precedence for events in that community.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreference {
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
  pub consents:         Facts,
  pub updated_at:       DateTime<Utc>,
}

impl UserPreference {
  /// The defaults a user gets before they have configured anything: web
  /// only, English, [`DEFAULT_MAX_PER_DAY`].
  pub fn defaults(user_id: impl Into<String>) -> Self {
    Self {
      user_id:          user_id.into(),
      community_id:     None,
      lang:             "en".to_owned(),
      channel_web:      true,
      channel_email:    false,
      channel_telegram: false,
      channel_whatsapp: false,
      email:            None,
      telegram_chat_id: None,
      whatsapp_phone:   None,
      max_per_day:      DEFAULT_MAX_PER_DAY,
      consents:         Facts::new(),
      updated_at:       Utc::now(),
    }
  }

  pub fn channel_enabled(&self, channel: Channel) -> bool {
    match channel {
      Channel::Web => self.channel_web,
      Channel::Email => self.channel_email,
      Channel::Telegram => self.channel_telegram,
      Channel::Whatsapp => self.channel_whatsapp,
    }
  }

  /// The enabled channels, in a stable order.
  pub fn enabled_channels(&self) -> Vec<Channel> {
    [Channel::Web, Channel::Email, Channel::Telegram, Channel::Whatsapp]
      .into_iter()
      .filter(|c| self.channel_enabled(*c))
      .collect()
  }
}
