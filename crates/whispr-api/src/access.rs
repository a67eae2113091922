//! Row ownership for `/rest/v1/{table}`. Procedures check their own
//! parameters in `rpc`; generic reads and writes go through these rules.

use serde_json::Value;
use whispr_db::{Database, DbError};
use whispr_types::api::{
    Claims, ERR_FORBIDDEN, Filter, FilterOp, TABLE_BUDDIES, TABLE_MESSAGES, TABLE_NOTES,
    TABLE_USERS,
};

use crate::error::ApiError;

/// Buddy columns the other side may write: the mood and presence mirror.
const MIRRORED_BUDDY_COLUMNS: &[&str] = &["mood", "is_online"];

/// Buddy columns fixed when the pair is created.
const BUDDY_LINK_COLUMNS: &[&str] = &["user_id", "buddy_user_id", "relationship_id"];

fn forbidden(message: impl Into<String>) -> ApiError {
    ApiError::new(ERR_FORBIDDEN, message)
}

/// True when the filters pin `column` to the caller. Filters are ANDed, so
/// every matched row then belongs to them.
fn pinned_to(filters: &[Filter], column: &str, caller: &str) -> bool {
    filters
        .iter()
        .any(|f| f.column == column && f.op == FilterOp::Eq && f.value == caller)
}

fn patch_keys(patch: &Value) -> impl Iterator<Item = &str> {
    patch.as_object().into_iter().flat_map(|object| object.keys().map(String::as_str))
}

pub fn check_insert(claims: &Claims, table: &str, body: &Value) -> Result<(), ApiError> {
    let owner = match table {
        TABLE_NOTES => "sender_id",
        TABLE_USERS => return Err(forbidden("accounts are created through /auth/register")),
        TABLE_BUDDIES | TABLE_MESSAGES => {
            return Err(forbidden(format!("'{}' rows are written by procedures", table)));
        }
        // unknown tables are reported by the store
        _ => return Ok(()),
    };

    let caller = claims.sub.to_string();
    let rows = match body {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        other => vec![other],
    };
    for row in rows {
        match row.get(owner) {
            Some(Value::String(id)) if *id == caller => {}
            _ => {
                return Err(forbidden(format!("'{}' must be the authenticated user", owner)));
            }
        }
    }
    Ok(())
}

pub fn check_update(
    claims: &Claims,
    table: &str,
    filters: &[Filter],
    patch: &Value,
) -> Result<(), ApiError> {
    if filters.is_empty() {
        return Err(DbError::Unfiltered("update").into());
    }
    let caller = claims.sub.to_string();

    match table {
        TABLE_USERS if pinned_to(filters, "id", &caller) => Ok(()),
        TABLE_NOTES if pinned_to(filters, "sender_id", &caller) => Ok(()),
        TABLE_BUDDIES if pinned_to(filters, "user_id", &caller) => {
            if patch_keys(patch).any(|key| BUDDY_LINK_COLUMNS.iter().any(|c| *c == key)) {
                Err(forbidden("buddy links cannot be rewritten"))
            } else {
                Ok(())
            }
        }
        TABLE_BUDDIES
            if pinned_to(filters, "buddy_user_id", &caller)
                && patch_keys(patch).all(|key| MIRRORED_BUDDY_COLUMNS.iter().any(|c| *c == key)) =>
        {
            Ok(())
        }
        TABLE_USERS | TABLE_NOTES | TABLE_BUDDIES | TABLE_MESSAGES => {
            Err(forbidden(format!("updates on '{}' must be limited to your own rows", table)))
        }
        _ => Ok(()),
    }
}

pub fn check_delete(claims: &Claims, table: &str, filters: &[Filter]) -> Result<(), ApiError> {
    if filters.is_empty() {
        return Err(DbError::Unfiltered("delete").into());
    }
    match table {
        TABLE_NOTES if pinned_to(filters, "sender_id", &claims.sub.to_string()) => Ok(()),
        TABLE_NOTES => Err(forbidden("only your own notes can be deleted")),
        TABLE_USERS => Err(forbidden("accounts are removed through delete_user_account")),
        TABLE_BUDDIES | TABLE_MESSAGES => {
            Err(forbidden("conversations are cleared through procedures"))
        }
        _ => Ok(()),
    }
}

/// Drop rows of conversations the caller is not part of. Users and notes
/// are public.
pub fn visible(
    db: &Database,
    table: &str,
    caller: &str,
    rows: Vec<Value>,
) -> whispr_db::Result<Vec<Value>> {
    match table {
        TABLE_BUDDIES => Ok(rows
            .into_iter()
            .filter(|row| row["user_id"] == caller || row["buddy_user_id"] == caller)
            .collect()),
        TABLE_MESSAGES => {
            let mine = db.relationships_of(caller)?;
            Ok(rows
                .into_iter()
                .filter(|row| row["relationship_id"].as_str().is_some_and(|id| mine.contains(id)))
                .collect())
        }
        _ => Ok(rows),
    }
}
