//! SQL schema for the Sitrep SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    user_id       TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,    -- argon2 PHC string; never leaves the store layer
    role          TEXT NOT NULL,    -- 'admin' | 'responder' | 'viewer'
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS incidents (
    incident_id TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    description TEXT,
    severity    TEXT NOT NULL,      -- 'critical' | 'high' | 'medium' | 'low'
    status      TEXT NOT NULL,      -- transition table lives in sitrep-core
    created_by  TEXT NOT NULL REFERENCES users(user_id),
    commander   TEXT NOT NULL REFERENCES users(user_id),
    created_at  TEXT NOT NULL,
    resolved_at TEXT                -- first entry to 'resolved'; sticky across re-opens
);

-- Ordered set; position preserves assignment order.
CREATE TABLE IF NOT EXISTS assignees (
    incident_id TEXT NOT NULL REFERENCES incidents(incident_id),
    user_id     TEXT NOT NULL REFERENCES users(user_id),
    position    INTEGER NOT NULL,
    PRIMARY KEY (incident_id, user_id)
);

-- The audit log. Append-only; the single UPDATE ever issued against this
-- table flips an action item's completed flag inside content_json.
CREATE TABLE IF NOT EXISTS updates (
    update_id    TEXT PRIMARY KEY,
    incident_id  TEXT NOT NULL REFERENCES incidents(incident_id),
    author_id    TEXT NOT NULL REFERENCES users(user_id),
    kind         TEXT NOT NULL,     -- discriminant of UpdateContent variant
    content_json TEXT NOT NULL,     -- JSON payload (inner content only)
    created_at   TEXT NOT NULL
);

-- Presence survives a process restart up to the inactivity TTL; the sweeper
-- clears anything the TTL outlived.
CREATE TABLE IF NOT EXISTS presence (
    user_id        TEXT NOT NULL REFERENCES users(user_id),
    incident_id    TEXT NOT NULL REFERENCES incidents(incident_id),
    session_id     TEXT NOT NULL,
    last_active_at TEXT NOT NULL,
    PRIMARY KEY (user_id, incident_id)
);

CREATE INDEX IF NOT EXISTS updates_incident_idx
    ON updates(incident_id, created_at, update_id);
CREATE INDEX IF NOT EXISTS presence_session_idx ON presence(session_id);
CREATE INDEX IF NOT EXISTS incidents_status_idx ON incidents(status);

PRAGMA user_version = 1;
";
