//! Tables and columns reachable through the generic executor.
//!
//! Only what is listed here can be read or written from outside; `credentials`
//! and `schema_version` are deliberately absent.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use whispr_types::api::{TABLE_BUDDIES, TABLE_MESSAGES, TABLE_NOTES, TABLE_USERS};
use whispr_types::models::canonical_timestamp;

use crate::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    /// Stored as 0/1, exposed as JSON booleans.
    Bool,
    /// Stored as canonical RFC 3339 text.
    Timestamp,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind }
}

#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [Column],
}

use ColumnKind::{Bool, Integer, Text, Timestamp};

pub static USERS: TableSpec = TableSpec {
    name: TABLE_USERS,
    columns: &[
        col("id", Text),
        col("anonymous_id", Text),
        col("mood", Text),
        col("created_at", Timestamp),
        col("last_seen", Timestamp),
        col("online", Bool),
    ],
};

pub static NOTES: TableSpec = TableSpec {
    name: TABLE_NOTES,
    columns: &[
        col("id", Text),
        col("sender_id", Text),
        col("content", Text),
        col("mood", Text),
        col("status", Text),
        col("propagation_count", Integer),
        col("is_active", Bool),
        col("expires_at", Timestamp),
        col("created_at", Timestamp),
        col("updated_at", Timestamp),
    ],
};

pub static BUDDIES: TableSpec = TableSpec {
    name: TABLE_BUDDIES,
    columns: &[
        col("id", Text),
        col("user_id", Text),
        col("buddy_user_id", Text),
        col("relationship_id", Text),
        col("name", Text),
        col("initials", Text),
        col("avatar_url", Text),
        col("last_message", Text),
        col("last_message_time", Timestamp),
        col("unread_count", Integer),
        col("is_online", Bool),
        col("is_pinned", Bool),
        col("status", Text),
        col("mood", Text),
        col("created_at", Timestamp),
        col("updated_at", Timestamp),
    ],
};

pub static MESSAGES: TableSpec = TableSpec {
    name: TABLE_MESSAGES,
    columns: &[
        col("id", Text),
        col("buddy_id", Text),
        col("relationship_id", Text),
        col("sender_id", Text),
        col("content", Text),
        col("message_type", Text),
        col("is_read", Bool),
        col("created_at", Timestamp),
        col("updated_at", Timestamp),
    ],
};

static TABLES: [&TableSpec; 4] = [&USERS, &NOTES, &BUDDIES, &MESSAGES];

pub fn table(name: &str) -> Result<&'static TableSpec> {
    TABLES
        .iter()
        .copied()
        .find(|t| t.name == name)
        .ok_or_else(|| DbError::UnknownTable(name.to_string()))
}

impl TableSpec {
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| DbError::UnknownColumn {
                table: self.name.to_string(),
                column: name.to_string(),
            })
    }

    pub fn has(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Column {
    fn invalid(&self, reason: impl Into<String>) -> DbError {
        DbError::InvalidValue {
            column: self.name.to_string(),
            reason: reason.into(),
        }
    }

    /// Convert the textual value of a `col=eq.value` filter.
    pub fn from_filter(&self, raw: &str) -> Result<SqlValue> {
        if raw == "null" {
            return Ok(SqlValue::Null);
        }
        match self.kind {
            Text => Ok(SqlValue::Text(raw.to_string())),
            Integer => raw
                .parse()
                .map(SqlValue::Integer)
                .map_err(|_| self.invalid(format!("'{}' is not an integer", raw))),
            Bool => match raw {
                "true" | "1" => Ok(SqlValue::Integer(1)),
                "false" | "0" => Ok(SqlValue::Integer(0)),
                _ => Err(self.invalid(format!("'{}' is not a boolean", raw))),
            },
            Timestamp => self.normalize_timestamp(raw).map(SqlValue::Text),
        }
    }

    /// Convert a JSON value from an insert or patch body.
    pub fn from_json(&self, value: &Value) -> Result<SqlValue> {
        match (self.kind, value) {
            (_, Value::Null) => Ok(SqlValue::Null),
            (Text, Value::String(s)) => Ok(SqlValue::Text(s.clone())),
            (Integer, Value::Number(n)) => n
                .as_i64()
                .map(SqlValue::Integer)
                .ok_or_else(|| self.invalid("expected an integer")),
            (Bool, Value::Bool(b)) => Ok(SqlValue::Integer(i64::from(*b))),
            (Timestamp, Value::String(s)) => self.normalize_timestamp(s).map(SqlValue::Text),
            (kind, other) => Err(self.invalid(format!("{:?} column cannot hold {}", kind, other))),
        }
    }

    /// Convert a stored value back to JSON.
    pub fn to_json(&self, value: SqlValue) -> Value {
        match (self.kind, value) {
            (_, SqlValue::Null) => Value::Null,
            (Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
            (_, SqlValue::Integer(i)) => Value::from(i),
            (_, SqlValue::Real(f)) => Value::from(f),
            (_, SqlValue::Text(s)) => Value::String(s),
            (_, SqlValue::Blob(_)) => Value::Null,
        }
    }

    fn normalize_timestamp(&self, raw: &str) -> Result<String> {
        DateTime::parse_from_rfc3339(raw)
            .map(|at| canonical_timestamp(&at.with_timezone(&Utc)))
            .map_err(|e| self.invalid(format!("'{}' is not an RFC 3339 timestamp: {}", raw, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tables_and_columns_are_rejected() {
        assert!(matches!(table("credentials"), Err(DbError::UnknownTable(_))));
        let notes = table(TABLE_NOTES).unwrap();
        assert!(notes.column("status").is_ok());
        assert!(matches!(notes.column("password"), Err(DbError::UnknownColumn { .. })));
    }

    #[test]
    fn filter_values_follow_column_kind() {
        let notes = table(TABLE_NOTES).unwrap();
        let is_active = notes.column("is_active").unwrap();
        assert_eq!(is_active.from_filter("true").unwrap(), SqlValue::Integer(1));
        assert!(is_active.from_filter("maybe").is_err());

        let count = notes.column("propagation_count").unwrap();
        assert_eq!(count.from_filter("3").unwrap(), SqlValue::Integer(3));

        let created = notes.column("created_at").unwrap();
        assert_eq!(
            created.from_filter("2026-03-01T12:00:00+02:00").unwrap(),
            SqlValue::Text("2026-03-01T10:00:00.000000Z".into())
        );
    }

    #[test]
    fn bools_round_trip_as_json_booleans() {
        let pinned = BUDDIES.column("is_pinned").unwrap();
        let stored = pinned.from_json(&Value::Bool(true)).unwrap();
        assert_eq!(pinned.to_json(stored), Value::Bool(true));
        assert!(pinned.from_json(&Value::from("yes")).is_err());
    }
}
