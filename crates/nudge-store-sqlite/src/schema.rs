//! SQL schema for the nudge SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Reference data. Written by seeding/admin tooling, read by the engine.
CREATE TABLE IF NOT EXISTS rules (
    rule_id     TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    enabled     INTEGER NOT NULL DEFAULT 1,
    family      TEXT NOT NULL,
    rule_type   TEXT NOT NULL,   -- 'informative' | 'opportunity' | 'alert'
    severity    TEXT NOT NULL,   -- 'info' | 'warning' | 'critical'
    definition  TEXT NOT NULL,   -- JSON definition document
    version     INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rule_overrides (
    override_id         TEXT PRIMARY KEY,
    rule_id             TEXT NOT NULL REFERENCES rules(rule_id) ON DELETE CASCADE,
    community_id        TEXT NOT NULL,
    enabled_override    INTEGER,
    definition_override TEXT NOT NULL DEFAULT '{}',
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    UNIQUE (rule_id, community_id)
);

CREATE TABLE IF NOT EXISTS templates (
    template_id TEXT PRIMARY KEY,
    rule_id     TEXT NOT NULL REFERENCES rules(rule_id) ON DELETE CASCADE,
    lang        TEXT NOT NULL DEFAULT 'en',
    title_jinja TEXT NOT NULL,
    body_jinja  TEXT NOT NULL,
    UNIQUE (rule_id, lang)
);

-- pref_key is user_id + community scope; NULL community is the fallback row.
CREATE TABLE IF NOT EXISTS user_preferences (
    pref_key         TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL,
    community_id     TEXT,
    lang             TEXT NOT NULL DEFAULT 'en',
    channel_web      INTEGER NOT NULL DEFAULT 1,
    channel_email    INTEGER NOT NULL DEFAULT 0,
    channel_telegram INTEGER NOT NULL DEFAULT 0,
    channel_whatsapp INTEGER NOT NULL DEFAULT 0,
    email            TEXT,
    telegram_chat_id TEXT,
    whatsapp_phone   TEXT,
    max_per_day      INTEGER NOT NULL DEFAULT 3,
    consents         TEXT NOT NULL DEFAULT '{}',
    updated_at       TEXT NOT NULL
);

-- Every evaluation attempt. Strictly append-only.
-- dedup_key uniqueness is what admits at most one 'created' row per scope.
CREATE TABLE IF NOT EXISTS nudge_logs (
    nudge_id     TEXT PRIMARY KEY,
    rule_id      TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    community_id TEXT,
    dedup_key    TEXT NOT NULL,
    status       TEXT NOT NULL,
    payload      TEXT NOT NULL DEFAULT '{}',
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notifications (
    notification_id TEXT PRIMARY KEY,
    nudge_id        TEXT NOT NULL UNIQUE REFERENCES nudge_logs(nudge_id),
    rule_id         TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    community_id    TEXT,
    family          TEXT NOT NULL,
    rule_type       TEXT NOT NULL,
    severity        TEXT NOT NULL,
    title           TEXT NOT NULL,
    body            TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending',
    created_at      TEXT NOT NULL,
    read_at         TEXT,
    deleted_at      TEXT
);

CREATE TABLE IF NOT EXISTS delivery_logs (
    delivery_id  TEXT PRIMARY KEY,
    nudge_id     TEXT NOT NULL REFERENCES nudge_logs(nudge_id),
    user_id      TEXT NOT NULL,
    community_id TEXT,
    channel      TEXT NOT NULL,
    destination  TEXT NOT NULL,
    status       TEXT NOT NULL,   -- 'sent' | 'failed' | 'suppressed'
    error        TEXT,
    created_at   TEXT NOT NULL,
    sent_at      TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS nudge_logs_dedup_key_idx ON nudge_logs(dedup_key);
CREATE INDEX IF NOT EXISTS nudge_logs_user_idx       ON nudge_logs(user_id);
CREATE INDEX IF NOT EXISTS user_preferences_user_idx ON user_preferences(user_id);
CREATE INDEX IF NOT EXISTS delivery_logs_nudge_idx   ON delivery_logs(nudge_id);
CREATE INDEX IF NOT EXISTS delivery_logs_sent_idx    ON delivery_logs(user_id, status, sent_at);

PRAGMA user_version = 1;
";
