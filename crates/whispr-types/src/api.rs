use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageType, NoteAction, NoteStatus};

// -- Tables --

pub const TABLE_USERS: &str = "users";
pub const TABLE_NOTES: &str = "whispr_notes";
pub const TABLE_BUDDIES: &str = "buddies";
pub const TABLE_MESSAGES: &str = "buddy_messages";

// -- Filters --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
        }
    }
}

/// One conjunctive column predicate, `column=eq.value` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &str, value: impl fmt::Display) -> Self {
        Self {
            column: column.to_string(),
            op: FilterOp::Eq,
            value: value.to_string(),
        }
    }

    pub fn neq(column: &str, value: impl fmt::Display) -> Self {
        Self {
            column: column.to_string(),
            op: FilterOp::Neq,
            value: value.to_string(),
        }
    }

    pub fn to_query_pair(&self) -> (String, String) {
        (self.column.clone(), format!("{}.{}", self.op.as_str(), self.value))
    }

    /// Parse the value half of a `column=op.value` pair.
    pub fn parse(column: &str, expr: &str) -> Result<Self, QueryParseError> {
        let (op, value) = expr
            .split_once('.')
            .ok_or_else(|| QueryParseError(format!("malformed filter '{}={}'", column, expr)))?;
        let op = match op {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            other => return Err(QueryParseError(format!("unsupported operator '{}'", other))),
        };
        Ok(Self {
            column: column.to_string(),
            op,
            value: value.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: &str) -> Self {
        Self { column: column.to_string(), ascending: true }
    }

    pub fn desc(column: &str) -> Self {
        Self { column: column.to_string(), ascending: false }
    }

    pub fn to_query_value(&self) -> String {
        format!("{}.{}", self.column, if self.ascending { "asc" } else { "desc" })
    }

    pub fn parse(expr: &str) -> Result<Self, QueryParseError> {
        match expr.rsplit_once('.') {
            Some((column, "asc")) => Ok(Self::asc(column)),
            Some((column, "desc")) => Ok(Self::desc(column)),
            None => Ok(Self::asc(expr)),
            Some(_) => Err(QueryParseError(format!("malformed order '{}'", expr))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParseError(pub String);

impl fmt::Display for QueryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for QueryParseError {}

/// A read against one table: conjunctive filters, optional order and limit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Select {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render as `?col=eq.v&order=col.desc&limit=N` pairs.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> =
            self.filters.iter().map(Filter::to_query_pair).collect();
        if let Some(order) = &self.order {
            pairs.push(("order".to_string(), order.to_query_value()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }

    pub fn from_query_pairs(pairs: &[(String, String)]) -> Result<Self, QueryParseError> {
        let mut select = Self::new();
        for (key, value) in pairs {
            match key.as_str() {
                "order" => select.order = Some(Order::parse(value)?),
                "limit" => {
                    let limit = value
                        .parse()
                        .map_err(|_| QueryParseError(format!("invalid limit '{}'", value)))?;
                    select.limit = Some(limit);
                }
                column => select.filters.push(Filter::parse(column, value)?),
            }
        }
        Ok(select)
    }
}

// -- Store errors --

pub const ERR_CONFLICT: &str = "conflict";
pub const ERR_NOT_FOUND: &str = "not_found";
pub const ERR_FORBIDDEN: &str = "forbidden";
pub const ERR_INVALID: &str = "invalid";
pub const ERR_CONSTRAINT: &str = "constraint";
pub const ERR_INTERNAL: &str = "internal";

/// Body returned by the store whenever a request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFailure {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affected {
    pub affected: usize,
}

// -- Procedures --

pub mod procedures {
    pub const HANDLE_NOTE_PROPAGATION: &str = "handle_note_propagation";
    pub const SEND_BUDDY_MESSAGE: &str = "send_buddy_message";
    pub const MARK_BUDDY_MESSAGES_READ: &str = "mark_buddy_messages_read";
    pub const TOGGLE_BUDDY_PIN: &str = "toggle_buddy_pin";
    pub const CLEAR_CHAT_HISTORY: &str = "clear_chat_history";
    pub const BLOCK_USER: &str = "block_user";
    pub const DELETE_USER_ACCOUNT: &str = "delete_user_account";
    pub const EXPIRE_NOTES: &str = "expire_notes";
    pub const PURGE_RESOLVED_NOTES: &str = "purge_resolved_notes";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotePropagationParams {
    pub note_id: Uuid,
    pub responder_id: Uuid,
    pub action: NoteAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationOutcome {
    pub note_id: Uuid,
    pub status: NoteStatus,
    pub propagation_count: i64,
    /// Responder's buddy row, present only after a listen.
    pub buddy_id: Option<Uuid>,
    /// Sender's mirrored buddy row, present only after a listen.
    pub counterpart_buddy_id: Option<Uuid>,
    pub relationship_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageParams {
    pub buddy_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
}

/// Parameters shared by procedures that act on one side of a relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuddyActionParams {
    pub buddy_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinState {
    pub buddy_id: Uuid,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserParams {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeParams {
    pub older_than_hours: i64,
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub mood: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub token: String,
}

/// JWT claims issued at login and checked on every store request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}
