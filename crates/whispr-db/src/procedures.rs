//! Stored procedures. Each one runs in a single transaction so that callers
//! never observe half of a multi-row change.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;
use whispr_types::api::{
    Affected, BuddyActionParams, Filter, NotePropagationParams, PinState, PropagationOutcome,
    PurgeParams, Select, SendMessageParams, UserParams, procedures,
};
use whispr_types::models::{
    BuddyMessage, BuddyStatus, MessageType, NoteAction, NoteStatus, canonical_timestamp,
};

use crate::rest::select_in;
use crate::schema::MESSAGES;
use crate::{Database, DbError, Result};

/// The parts of a buddy row the procedures reason about.
#[derive(Debug, Clone)]
struct BuddyLink {
    id: String,
    user_id: String,
    buddy_user_id: String,
    relationship_id: String,
    blocked: bool,
}

struct NoteHead {
    sender_id: String,
    content: String,
    status: NoteStatus,
    is_active: bool,
}

struct Profile {
    anonymous_id: String,
    mood: String,
    online: bool,
}

impl Database {
    /// Dispatch a named procedure with JSON parameters.
    pub fn call(&self, name: &str, params: Value) -> Result<Value> {
        match name {
            procedures::HANDLE_NOTE_PROPAGATION => {
                to_json(self.handle_note_propagation(&parse(params)?)?)
            }
            procedures::SEND_BUDDY_MESSAGE => to_json(self.send_buddy_message(&parse(params)?)?),
            procedures::MARK_BUDDY_MESSAGES_READ => {
                to_json(self.mark_buddy_messages_read(&parse(params)?)?)
            }
            procedures::TOGGLE_BUDDY_PIN => to_json(self.toggle_buddy_pin(&parse(params)?)?),
            procedures::CLEAR_CHAT_HISTORY => to_json(self.clear_chat_history(&parse(params)?)?),
            procedures::BLOCK_USER => to_json(self.block_user(&parse(params)?)?),
            procedures::DELETE_USER_ACCOUNT => {
                to_json(self.delete_user_account(&parse(params)?)?)
            }
            procedures::EXPIRE_NOTES => to_json(Affected {
                affected: self.expire_notes(Utc::now())?,
            }),
            procedures::PURGE_RESOLVED_NOTES => {
                to_json(self.purge_resolved_notes(&parse(params)?)?)
            }
            other => Err(DbError::UnknownProcedure(other.to_string())),
        }
    }

    /// Resolve a note for one responder. Only the first responder on an
    /// active note wins; everyone after that gets a conflict.
    pub fn handle_note_propagation(&self, p: &NotePropagationParams) -> Result<PropagationOutcome> {
        let note_id = p.note_id.to_string();
        let responder_id = p.responder_id.to_string();

        let outcome = self.with_tx(|tx| {
            let note = note_head(tx, &note_id)?.ok_or(DbError::NotFound("note"))?;
            if !note.is_active {
                return Err(DbError::Conflict("note already resolved".into()));
            }
            let next = note
                .status
                .respond(p.action)
                .map_err(|e| DbError::Conflict(e.to_string()))?;
            if note.sender_id == responder_id {
                return Err(DbError::Forbidden("cannot respond to your own note".into()));
            }

            let now = canonical_timestamp(&Utc::now());
            let bump = i64::from(p.action == NoteAction::Listen);
            let changed = tx.execute(
                "UPDATE whispr_notes
                 SET status = ?1, propagation_count = propagation_count + ?2, updated_at = ?3
                 WHERE id = ?4 AND status = 'active' AND is_active = 1",
                params![next.as_str(), bump, now, note_id],
            )?;
            if changed == 0 {
                return Err(DbError::Conflict("note already resolved".into()));
            }

            let mut outcome = PropagationOutcome {
                note_id: p.note_id,
                status: next,
                propagation_count: tx.query_row(
                    "SELECT propagation_count FROM whispr_notes WHERE id = ?1",
                    [&note_id],
                    |r| r.get(0),
                )?,
                buddy_id: None,
                counterpart_buddy_id: None,
                relationship_id: None,
            };

            if p.action == NoteAction::Listen {
                let (own, counterpart) =
                    ensure_buddy_pair(tx, &responder_id, &note.sender_id, &now)?;
                seed_note_message(tx, &counterpart, &note.content, &now)?;
                outcome.buddy_id = Some(parse_id(&own.id)?);
                outcome.counterpart_buddy_id = Some(parse_id(&counterpart.id)?);
                outcome.relationship_id = Some(parse_id(&own.relationship_id)?);
            }

            Ok(outcome)
        })?;

        info!(
            note_id = %p.note_id,
            responder_id = %p.responder_id,
            status = %outcome.status,
            "note resolved"
        );
        Ok(outcome)
    }

    /// Store a message and update both sides' previews. Only the recipient's
    /// unread counter moves.
    pub fn send_buddy_message(&self, p: &SendMessageParams) -> Result<BuddyMessage> {
        let sender_id = p.sender_id.to_string();

        let row = self.with_tx(|tx| {
            let (own, counterpart) = resolve_sides(tx, &p.buddy_id.to_string(), &sender_id)?;
            if own.blocked || counterpart.blocked {
                return Err(DbError::Forbidden("relationship is blocked".into()));
            }

            let now = canonical_timestamp(&Utc::now());
            let message_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO buddy_messages
                 (id, buddy_id, relationship_id, sender_id, content, message_type, is_read, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
                params![
                    message_id,
                    own.id,
                    own.relationship_id,
                    sender_id,
                    p.content,
                    p.message_type.as_str(),
                    now
                ],
            )?;
            tx.execute(
                "UPDATE buddies SET last_message = ?1, last_message_time = ?2, updated_at = ?2
                 WHERE id = ?3",
                params![p.content, now, own.id],
            )?;
            tx.execute(
                "UPDATE buddies SET last_message = ?1, last_message_time = ?2, updated_at = ?2,
                 unread_count = unread_count + 1
                 WHERE id = ?3",
                params![p.content, now, counterpart.id],
            )?;

            select_in(tx, &MESSAGES, &Select::new().filter(Filter::eq("id", &message_id)))?
                .into_iter()
                .next()
                .ok_or(DbError::NotFound("message"))
        })?;

        let message: BuddyMessage = serde_json::from_value(row)?;
        debug!(message_id = %message.id, buddy_id = %p.buddy_id, "message stored");
        Ok(message)
    }

    /// Flip every message the other side sent to read and zero the caller's counter.
    pub fn mark_buddy_messages_read(&self, p: &BuddyActionParams) -> Result<Affected> {
        let user_id = p.user_id.to_string();
        self.with_tx(|tx| {
            let (own, _) = resolve_sides(tx, &p.buddy_id.to_string(), &user_id)?;
            let now = canonical_timestamp(&Utc::now());
            let affected = tx.execute(
                "UPDATE buddy_messages SET is_read = 1, updated_at = ?1
                 WHERE relationship_id = ?2 AND sender_id <> ?3 AND is_read = 0",
                params![now, own.relationship_id, user_id],
            )?;
            tx.execute("UPDATE buddies SET unread_count = 0 WHERE id = ?1", [&own.id])?;
            Ok(Affected { affected })
        })
    }

    pub fn toggle_buddy_pin(&self, p: &BuddyActionParams) -> Result<PinState> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE buddies SET is_pinned = 1 - is_pinned WHERE id = ?1 AND user_id = ?2",
                params![p.buddy_id.to_string(), p.user_id.to_string()],
            )?;
            if changed == 0 {
                return Err(DbError::NotFound("buddy"));
            }
            let is_pinned: bool = tx.query_row(
                "SELECT is_pinned FROM buddies WHERE id = ?1",
                [p.buddy_id.to_string()],
                |r| r.get(0),
            )?;
            Ok(PinState {
                buddy_id: p.buddy_id,
                is_pinned,
            })
        })
    }

    /// Delete the conversation for both sides. The buddy rows stay.
    pub fn clear_chat_history(&self, p: &BuddyActionParams) -> Result<Affected> {
        let user_id = p.user_id.to_string();
        let affected = self.with_tx(|tx| {
            let (own, _) = resolve_sides(tx, &p.buddy_id.to_string(), &user_id)?;
            let affected = tx.execute(
                "DELETE FROM buddy_messages WHERE relationship_id = ?1",
                [&own.relationship_id],
            )?;
            tx.execute(
                "UPDATE buddies SET last_message = NULL, last_message_time = NULL, unread_count = 0
                 WHERE relationship_id = ?1",
                [&own.relationship_id],
            )?;
            Ok(affected)
        })?;

        info!(buddy_id = %p.buddy_id, deleted = affected, "chat history cleared");
        Ok(Affected { affected })
    }

    /// Block from the caller's side. Sending is refused while either side is blocked.
    pub fn block_user(&self, p: &BuddyActionParams) -> Result<Affected> {
        self.with_tx(|tx| {
            let affected = tx.execute(
                "UPDATE buddies SET status = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
                params![
                    BuddyStatus::Blocked.as_str(),
                    canonical_timestamp(&Utc::now()),
                    p.buddy_id.to_string(),
                    p.user_id.to_string()
                ],
            )?;
            if affected == 0 {
                return Err(DbError::NotFound("buddy"));
            }
            Ok(Affected { affected })
        })
    }

    /// Remove a user and everything hanging off them, including the other
    /// side of each relationship.
    pub fn delete_user_account(&self, p: &UserParams) -> Result<Affected> {
        let user_id = p.user_id.to_string();
        let affected = self.with_tx(|tx| {
            let mut affected = tx.execute(
                "DELETE FROM buddy_messages WHERE relationship_id IN
                 (SELECT relationship_id FROM buddies WHERE user_id = ?1 OR buddy_user_id = ?1)",
                [&user_id],
            )?;
            affected += tx.execute(
                "DELETE FROM buddies WHERE user_id = ?1 OR buddy_user_id = ?1",
                [&user_id],
            )?;
            affected += tx.execute("DELETE FROM whispr_notes WHERE sender_id = ?1", [&user_id])?;
            tx.execute("DELETE FROM credentials WHERE user_id = ?1", [&user_id])?;
            let users = tx.execute("DELETE FROM users WHERE id = ?1", [&user_id])?;
            if users == 0 {
                return Err(DbError::NotFound("user"));
            }
            Ok(affected + users)
        })?;

        info!(user_id = %p.user_id, rows = affected, "account deleted");
        Ok(Affected { affected })
    }

    /// Move active notes past their `expires_at` to `expired`.
    pub fn expire_notes(&self, now: DateTime<Utc>) -> Result<usize> {
        let now = canonical_timestamp(&now);
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE whispr_notes SET status = ?1, is_active = 0, updated_at = ?2
                 WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= ?2",
                params![NoteStatus::Expired.as_str(), now],
            )?)
        })
    }

    /// Physically remove resolved notes that have not changed for a while.
    pub fn purge_resolved_notes(&self, p: &PurgeParams) -> Result<Affected> {
        if p.older_than_hours < 0 {
            return Err(DbError::InvalidParams("older_than_hours must not be negative".into()));
        }
        let cutoff = canonical_timestamp(&(Utc::now() - Duration::hours(p.older_than_hours)));
        let affected = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM whispr_notes WHERE status <> 'active' AND updated_at < ?1",
                [&cutoff],
            )?)
        })?;
        info!(affected, "purged resolved notes");
        Ok(Affected { affected })
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| DbError::InvalidParams(e.to_string()))
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn parse_id(id: &str) -> Result<Uuid> {
    id.parse().map_err(|e| DbError::InvalidValue {
        column: "id".into(),
        reason: format!("'{}': {}", id, e),
    })
}

fn note_head(conn: &Connection, note_id: &str) -> Result<Option<NoteHead>> {
    let row = conn
        .query_row(
            "SELECT sender_id, content, status, is_active FROM whispr_notes WHERE id = ?1",
            [note_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, bool>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(sender_id, content, status, is_active)| {
        let status = status.parse().map_err(|e: whispr_types::models::ParseEnumError| {
            DbError::InvalidValue {
                column: "status".into(),
                reason: e.to_string(),
            }
        })?;
        Ok(NoteHead {
            sender_id,
            content,
            status,
            is_active,
        })
    })
    .transpose()
}

fn profile(conn: &Connection, user_id: &str) -> Result<Profile> {
    conn.query_row(
        "SELECT anonymous_id, mood, online FROM users WHERE id = ?1",
        [user_id],
        |r| {
            Ok(Profile {
                anonymous_id: r.get(0)?,
                mood: r.get(1)?,
                online: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or(DbError::NotFound("user"))
}

const LINK_COLUMNS: &str = "id, user_id, buddy_user_id, relationship_id, status";

fn map_link(r: &rusqlite::Row<'_>) -> rusqlite::Result<BuddyLink> {
    Ok(BuddyLink {
        id: r.get(0)?,
        user_id: r.get(1)?,
        buddy_user_id: r.get(2)?,
        relationship_id: r.get(3)?,
        blocked: r.get::<_, String>(4)? == BuddyStatus::Blocked.as_str(),
    })
}

fn link_by_id(conn: &Connection, buddy_id: &str) -> Result<Option<BuddyLink>> {
    let sql = format!("SELECT {} FROM buddies WHERE id = ?1", LINK_COLUMNS);
    Ok(conn.query_row(&sql, [buddy_id], map_link).optional()?)
}

fn link_between(conn: &Connection, user_id: &str, buddy_user_id: &str) -> Result<Option<BuddyLink>> {
    let sql = format!(
        "SELECT {} FROM buddies WHERE user_id = ?1 AND buddy_user_id = ?2",
        LINK_COLUMNS
    );
    Ok(conn
        .query_row(&sql, [user_id, buddy_user_id], map_link)
        .optional()?)
}

fn counterpart_of(conn: &Connection, link: &BuddyLink) -> Result<BuddyLink> {
    let sql = format!(
        "SELECT {} FROM buddies WHERE relationship_id = ?1 AND id <> ?2",
        LINK_COLUMNS
    );
    conn.query_row(&sql, [&link.relationship_id, &link.id], map_link)
        .optional()?
        .ok_or(DbError::NotFound("buddy"))
}

/// Given either side's buddy id, return `(caller's row, other side's row)`.
fn resolve_sides(conn: &Connection, buddy_id: &str, user_id: &str) -> Result<(BuddyLink, BuddyLink)> {
    let link = link_by_id(conn, buddy_id)?.ok_or(DbError::NotFound("buddy"))?;
    if link.user_id == user_id {
        let counterpart = counterpart_of(conn, &link)?;
        Ok((link, counterpart))
    } else if link.buddy_user_id == user_id {
        let own = counterpart_of(conn, &link)?;
        Ok((own, link))
    } else {
        Err(DbError::Forbidden("not a participant of this conversation".into()))
    }
}

/// Make sure both directed rows exist, reusing any that already do.
/// Returns `(responder's row, sender's row)`.
fn ensure_buddy_pair(
    conn: &Connection,
    responder_id: &str,
    sender_id: &str,
    now: &str,
) -> Result<(BuddyLink, BuddyLink)> {
    let existing_own = link_between(conn, responder_id, sender_id)?;
    let existing_other = link_between(conn, sender_id, responder_id)?;

    let relationship_id = existing_own
        .as_ref()
        .or(existing_other.as_ref())
        .map(|l| l.relationship_id.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let own = match existing_own {
        Some(link) => link,
        None => insert_buddy(conn, responder_id, sender_id, &relationship_id, now)?,
    };
    let other = match existing_other {
        Some(link) => link,
        None => insert_buddy(conn, sender_id, responder_id, &relationship_id, now)?,
    };
    Ok((own, other))
}

fn insert_buddy(
    conn: &Connection,
    user_id: &str,
    buddy_user_id: &str,
    relationship_id: &str,
    now: &str,
) -> Result<BuddyLink> {
    let other = profile(conn, buddy_user_id)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO buddies
         (id, user_id, buddy_user_id, relationship_id, name, initials, is_online, status, mood, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            id,
            user_id,
            buddy_user_id,
            relationship_id,
            other.anonymous_id,
            initials(&other.anonymous_id),
            other.online,
            BuddyStatus::Active.as_str(),
            other.mood,
            now
        ],
    )?;
    debug!(buddy_id = %id, user_id, buddy_user_id, "buddy row created");

    Ok(BuddyLink {
        id,
        user_id: user_id.to_string(),
        buddy_user_id: buddy_user_id.to_string(),
        relationship_id: relationship_id.to_string(),
        blocked: false,
    })
}

/// The note itself opens the conversation, attributed to its author and
/// already read since the responder has just seen it.
fn seed_note_message(conn: &Connection, sender_row: &BuddyLink, content: &str, now: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO buddy_messages
         (id, buddy_id, relationship_id, sender_id, content, message_type, is_read, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
        params![
            Uuid::new_v4().to_string(),
            sender_row.id,
            sender_row.relationship_id,
            sender_row.user_id,
            content,
            MessageType::Text.as_str(),
            now
        ],
    )?;
    conn.execute(
        "UPDATE buddies SET last_message = ?1, last_message_time = ?2, updated_at = ?2
         WHERE relationship_id = ?3",
        params![content, now, sender_row.relationship_id],
    )?;
    Ok(())
}

/// Up to two uppercase characters from an anonymous handle, e.g. `whisper-3fa9` -> `W3`.
pub fn initials(name: &str) -> String {
    let words: Vec<&str> = name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let picked: String = match words.as_slice() {
        [] => String::new(),
        [single] => single.chars().take(2).collect(),
        [first, second, ..] => first.chars().take(1).chain(second.chars().take(1)).collect(),
    };
    picked.to_uppercase()
}
