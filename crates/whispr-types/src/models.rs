use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Format a timestamp the way the store keeps it: RFC 3339, UTC, fixed
/// microsecond precision. Fixed width keeps lexical order equal to time order.
pub fn canonical_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

// -- Users --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub anonymous_id: String,
    pub mood: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub online: bool,
}

// -- Notes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    Active,
    Listened,
    Rejected,
    Expired,
}

string_enum!(NoteStatus, "note status", {
    Active => "active",
    Listened => "listened",
    Rejected => "rejected",
    Expired => "expired",
});

/// What a listener chose to do with a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteAction {
    Listen,
    Reject,
}

string_enum!(NoteAction, "note action", {
    Listen => "listen",
    Reject => "reject",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("note already resolved (status: {0})")]
pub struct AlreadyResolved(pub NoteStatus);

impl NoteStatus {
    /// Terminal notes never transition again and never appear as candidates.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Status after a listener acts on the note.
    pub fn respond(self, action: NoteAction) -> Result<Self, AlreadyResolved> {
        if self.is_terminal() {
            return Err(AlreadyResolved(self));
        }
        Ok(match action {
            NoteAction::Listen => Self::Listened,
            NoteAction::Reject => Self::Rejected,
        })
    }

    /// Time-driven transition, applied by the store's sweeper.
    pub fn expire(self) -> Result<Self, AlreadyResolved> {
        if self.is_terminal() {
            return Err(AlreadyResolved(self));
        }
        Ok(Self::Expired)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhisprNote {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub mood: String,
    pub status: NoteStatus,
    pub propagation_count: i64,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WhisprNote {
    /// Whether the note is still in circulation for any viewer.
    pub fn is_candidate(&self) -> bool {
        self.status == NoteStatus::Active && self.is_active
    }
}

// -- Buddies --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuddyStatus {
    Active,
    Blocked,
}

string_enum!(BuddyStatus, "buddy status", {
    Active => "active",
    Blocked => "blocked",
});

/// One side's view of a relationship. Both rows of a pair share `relationship_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buddy {
    pub id: Uuid,
    pub user_id: Uuid,
    pub buddy_user_id: Uuid,
    pub relationship_id: Uuid,
    pub name: String,
    pub initials: String,
    pub avatar_url: Option<String>,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: i64,
    pub is_online: bool,
    pub is_pinned: bool,
    pub status: BuddyStatus,
    pub mood: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    Emoji,
}

string_enum!(MessageType, "message type", {
    Text => "text",
    Image => "image",
    File => "file",
    Emoji => "emoji",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuddyMessage {
    pub id: Uuid,
    /// Buddy row of the sending side.
    pub buddy_id: Uuid,
    pub relationship_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
