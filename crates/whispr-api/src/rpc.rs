use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde_json::Value;
use tracing::debug;
use whispr_types::api::{Claims, ERR_FORBIDDEN, ERR_INVALID};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;

/// Parameters that name the acting user. A caller may only act as themselves.
const IDENTITY_PARAMS: &[&str] = &["responder_id", "sender_id", "user_id"];

/// `POST /rest/v1/rpc/{name}`
pub async fn call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    check_identity(&claims, &params)?;
    debug!(procedure = %name, caller = %claims.sub, "rpc");

    let result = blocking(&state, move |db| db.call(&name, params)).await?;
    Ok(Json(result))
}

fn check_identity(claims: &Claims, params: &Value) -> Result<(), ApiError> {
    let object = params
        .as_object()
        .ok_or_else(|| ApiError::new(ERR_INVALID, "parameters must be a JSON object"))?;

    let caller = claims.sub.to_string();
    for key in IDENTITY_PARAMS {
        match object.get(*key) {
            Some(Value::String(id)) if *id == caller => {}
            Some(_) => {
                return Err(ApiError::new(
                    ERR_FORBIDDEN,
                    format!("'{}' must be the authenticated user", key),
                ));
            }
            None => {}
        }
    }
    Ok(())
}
