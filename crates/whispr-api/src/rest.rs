//! `/rest/v1/{table}`: filtered reads and writes over the whitelisted tables,
//! limited to the caller's own rows by [`access`].

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;
use tracing::debug;
use whispr_types::api::{Affected, Claims, Select};

use crate::access;
use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;

type Pairs = Query<Vec<(String, String)>>;

pub async fn select(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Extension(claims): Extension<Claims>,
    Query(pairs): Pairs,
) -> Result<Json<Vec<Value>>, ApiError> {
    let select = Select::from_query_pairs(&pairs)?;
    debug!(table = %table, filters = select.filters.len(), caller = %claims.sub, "select");
    let caller = claims.sub.to_string();
    let rows = blocking(&state, move |db| {
        let rows = db.select_rows(&table, &select)?;
        access::visible(db, &table, &caller, rows)
    })
    .await?;
    Ok(Json(rows))
}

pub async fn insert(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    access::check_insert(&claims, &table, &body)?;
    let rows = blocking(&state, move |db| db.insert_rows(&table, &body)).await?;
    Ok((StatusCode::CREATED, Json(rows)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Extension(claims): Extension<Claims>,
    Query(pairs): Pairs,
    Json(patch): Json<Value>,
) -> Result<Json<Affected>, ApiError> {
    let select = Select::from_query_pairs(&pairs)?;
    access::check_update(&claims, &table, &select.filters, &patch)?;
    let affected =
        blocking(&state, move |db| db.update_rows(&table, &select.filters, &patch)).await?;
    Ok(Json(Affected { affected }))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Extension(claims): Extension<Claims>,
    Query(pairs): Pairs,
) -> Result<Json<Affected>, ApiError> {
    let select = Select::from_query_pairs(&pairs)?;
    access::check_delete(&claims, &table, &select.filters)?;
    let affected = blocking(&state, move |db| db.delete_rows(&table, &select.filters)).await?;
    Ok(Json(Affected { affected }))
}
