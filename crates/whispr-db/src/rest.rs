//! Generic table executor: the store side of `table?col=eq.v&order=..&limit=N`.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;
use whispr_types::api::{Filter, FilterOp, Select, TABLE_NOTES};
use whispr_types::models::canonical_timestamp;

use crate::schema::{self, TableSpec};
use crate::{Database, DbError, Result};

/// Columns stamped with the current time on insert when the caller leaves them out.
const STAMPED_ON_INSERT: &[&str] = &["created_at", "updated_at", "last_seen"];

/// Note lifecycle columns. Only the propagation procedure and the expiry
/// sweep move them; generic writes may at most spell out the defaults.
const NOTE_STATE_COLUMNS: &[&str] = &["status", "propagation_count", "is_active"];

impl Database {
    pub fn select_rows(&self, table: &str, select: &Select) -> Result<Vec<Value>> {
        let spec = schema::table(table)?;
        self.with_conn(|conn| select_in(conn, spec, select))
    }

    /// Insert one object or an array of objects. All rows land or none do.
    pub fn insert_rows(&self, table: &str, body: &Value) -> Result<Vec<Value>> {
        let spec = schema::table(table)?;
        let rows = match body {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        };

        self.with_tx(|tx| {
            let mut inserted = Vec::with_capacity(rows.len());
            for row in rows {
                let id = insert_in(tx, spec, row)?;
                let select = Select::new().filter(Filter::eq("id", &id));
                inserted.extend(select_in(tx, spec, &select)?);
            }
            debug!(table = spec.name, count = inserted.len(), "inserted rows");
            Ok(inserted)
        })
    }

    pub fn update_rows(&self, table: &str, filters: &[Filter], patch: &Value) -> Result<usize> {
        let spec = schema::table(table)?;
        if filters.is_empty() {
            return Err(DbError::Unfiltered("update"));
        }
        let patch = patch.as_object().ok_or_else(|| DbError::InvalidValue {
            column: "*".into(),
            reason: "patch must be a JSON object".into(),
        })?;
        if patch.is_empty() {
            return Err(DbError::InvalidValue {
                column: "*".into(),
                reason: "patch is empty".into(),
            });
        }

        guard_note_state(spec, patch, false)?;

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (name, value) in patch {
            if name == "id" {
                return Err(DbError::InvalidValue {
                    column: "id".into(),
                    reason: "primary key is immutable".into(),
                });
            }
            let column = spec.column(name)?;
            params.push(column.from_json(value)?);
            assignments.push(format!("{} = ?", column.name));
        }
        if spec.has("updated_at") && !patch.contains_key("updated_at") {
            params.push(SqlValue::Text(canonical_timestamp(&Utc::now())));
            assignments.push("updated_at = ?".to_string());
        }

        let clause = where_clause(spec, filters, &mut params)?;
        let sql = format!("UPDATE {} SET {}{}", spec.name, assignments.join(", "), clause);

        self.with_conn(|conn| Ok(conn.execute(&sql, params_from_iter(params.iter()))?))
    }

    pub fn delete_rows(&self, table: &str, filters: &[Filter]) -> Result<usize> {
        let spec = schema::table(table)?;
        if filters.is_empty() {
            return Err(DbError::Unfiltered("delete"));
        }

        let mut params = Vec::new();
        let clause = where_clause(spec, filters, &mut params)?;
        let sql = format!("DELETE FROM {}{}", spec.name, clause);

        self.with_conn(|conn| Ok(conn.execute(&sql, params_from_iter(params.iter()))?))
    }

    /// Relationship ids the user holds a buddy row in.
    pub fn relationships_of(&self, user_id: &str) -> Result<HashSet<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT relationship_id FROM buddies WHERE user_id = ?1")?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<HashSet<String>, _>>()?;
            Ok(ids)
        })
    }
}

/// Refuse lifecycle changes on notes outside the procedures. An insert may
/// only restate the starting values.
fn guard_note_state(spec: &TableSpec, object: &Map<String, Value>, inserting: bool) -> Result<()> {
    if spec.name != TABLE_NOTES {
        return Ok(());
    }
    for &name in NOTE_STATE_COLUMNS {
        let Some(value) = object.get(name) else {
            continue;
        };
        let initial = match name {
            "status" => *value == "active",
            "propagation_count" => *value == 0,
            _ => *value == true,
        };
        if !(inserting && initial) {
            return Err(DbError::Forbidden(format!(
                "'{}' only changes through handle_note_propagation",
                name
            )));
        }
    }
    Ok(())
}

pub(crate) fn select_in(conn: &Connection, spec: &TableSpec, select: &Select) -> Result<Vec<Value>> {
    let mut params = Vec::new();
    let mut sql = format!(
        "SELECT {} FROM {}{}",
        spec.select_list(),
        spec.name,
        where_clause(spec, &select.filters, &mut params)?
    );

    if let Some(order) = &select.order {
        let column = spec.column(&order.column)?;
        let dir = if order.ascending { "ASC" } else { "DESC" };
        // rowid breaks ties between rows written within the same microsecond
        sql.push_str(&format!(" ORDER BY {} {}, rowid {}", column.name, dir, dir));
    }
    if let Some(limit) = select.limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(limit as i64));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let mut object = Map::with_capacity(spec.columns.len());
            for (idx, column) in spec.columns.iter().enumerate() {
                let value: SqlValue = row.get(idx)?;
                object.insert(column.name.to_string(), column.to_json(value));
            }
            Ok(Value::Object(object))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Insert one row, returning its id.
fn insert_in(conn: &Connection, spec: &TableSpec, row: &Value) -> Result<String> {
    let object = row.as_object().ok_or_else(|| DbError::InvalidValue {
        column: "*".into(),
        reason: "row must be a JSON object".into(),
    })?;
    guard_note_state(spec, object, true)?;

    let mut names = Vec::new();
    let mut params = Vec::new();
    for (name, value) in object {
        let column = spec.column(name)?;
        names.push(column.name);
        params.push(column.from_json(value)?);
    }

    let id = match object.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(_) => {
            return Err(DbError::InvalidValue {
                column: "id".into(),
                reason: "id must be a string".into(),
            });
        }
        None => {
            let id = Uuid::new_v4().to_string();
            names.push("id");
            params.push(SqlValue::Text(id.clone()));
            id
        }
    };

    let now = canonical_timestamp(&Utc::now());
    for &stamped in STAMPED_ON_INSERT {
        if spec.has(stamped) && !object.contains_key(stamped) {
            names.push(stamped);
            params.push(SqlValue::Text(now.clone()));
        }
    }

    let placeholders = vec!["?"; names.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        spec.name,
        names.join(", "),
        placeholders
    );
    conn.execute(&sql, params_from_iter(params.iter()))?;
    Ok(id)
}

fn where_clause(spec: &TableSpec, filters: &[Filter], params: &mut Vec<SqlValue>) -> Result<String> {
    if filters.is_empty() {
        return Ok(String::new());
    }

    let mut predicates = Vec::with_capacity(filters.len());
    for filter in filters {
        let column = spec.column(&filter.column)?;
        let value = column.from_filter(&filter.value)?;
        let predicate = match (filter.op, &value) {
            (FilterOp::Eq, SqlValue::Null) => format!("{} IS NULL", column.name),
            (FilterOp::Neq, SqlValue::Null) => format!("{} IS NOT NULL", column.name),
            (FilterOp::Eq, _) => format!("{} = ?", column.name),
            (FilterOp::Neq, _) => format!("{} <> ?", column.name),
        };
        if value != SqlValue::Null {
            params.push(value);
        }
        predicates.push(predicate);
    }

    Ok(format!(" WHERE {}", predicates.join(" AND ")))
}
