use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub const LATEST_VERSION: i64 = 1;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                anonymous_id    TEXT NOT NULL UNIQUE,
                mood            TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                last_seen       TEXT NOT NULL,
                online          INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE credentials (
                user_id     TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE whispr_notes (
                id                  TEXT PRIMARY KEY,
                sender_id           TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content             TEXT NOT NULL,
                mood                TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'active'
                    CHECK(status IN ('active', 'listened', 'rejected', 'expired')),
                propagation_count   INTEGER NOT NULL DEFAULT 0,
                is_active           INTEGER NOT NULL DEFAULT 1,
                expires_at          TEXT,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE INDEX idx_notes_status_created
                ON whispr_notes(status, created_at);

            CREATE TABLE buddies (
                id                  TEXT PRIMARY KEY,
                user_id             TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                buddy_user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                relationship_id     TEXT NOT NULL,
                name                TEXT NOT NULL,
                initials            TEXT NOT NULL,
                avatar_url          TEXT,
                last_message        TEXT,
                last_message_time   TEXT,
                unread_count        INTEGER NOT NULL DEFAULT 0,
                is_online           INTEGER NOT NULL DEFAULT 0,
                is_pinned           INTEGER NOT NULL DEFAULT 0,
                status              TEXT NOT NULL DEFAULT 'active'
                    CHECK(status IN ('active', 'blocked')),
                mood                TEXT,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL,
                UNIQUE(user_id, buddy_user_id)
            );

            CREATE INDEX idx_buddies_relationship
                ON buddies(relationship_id);

            CREATE TABLE buddy_messages (
                id                  TEXT PRIMARY KEY,
                buddy_id            TEXT NOT NULL REFERENCES buddies(id) ON DELETE CASCADE,
                relationship_id     TEXT NOT NULL,
                sender_id           TEXT NOT NULL,
                content             TEXT NOT NULL,
                message_type        TEXT NOT NULL DEFAULT 'text'
                    CHECK(message_type IN ('text', 'image', 'file', 'emoji')),
                is_read             INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE INDEX idx_messages_relationship
                ON buddy_messages(relationship_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    Ok(())
}
