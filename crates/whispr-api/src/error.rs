use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;
use whispr_db::DbError;
use whispr_types::api::{
    ERR_CONFLICT, ERR_CONSTRAINT, ERR_FORBIDDEN, ERR_INTERNAL, ERR_INVALID, ERR_NOT_FOUND,
    QueryParseError, StoreFailure,
};

pub const ERR_UNAUTHORIZED: &str = "unauthorized";

/// A refused request: the status line plus a `{code, message}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub failure: StoreFailure,
}

impl ApiError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            status: status_for(code),
            failure: StoreFailure {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(ERR_UNAUTHORIZED, "missing or invalid bearer token")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ERR_INTERNAL, message)
    }
}

pub fn status_for(code: &str) -> StatusCode {
    match code {
        ERR_CONFLICT => StatusCode::CONFLICT,
        ERR_NOT_FOUND => StatusCode::NOT_FOUND,
        ERR_FORBIDDEN => StatusCode::FORBIDDEN,
        ERR_INVALID | ERR_CONSTRAINT => StatusCode::BAD_REQUEST,
        ERR_UNAUTHORIZED => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        let failure = err.to_failure();
        if failure.code == ERR_INTERNAL {
            error!("store error: {}", err);
        }
        Self {
            status: status_for(&failure.code),
            failure,
        }
    }
}

impl From<QueryParseError> for ApiError {
    fn from(err: QueryParseError) -> Self {
        Self::new(ERR_INVALID, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.failure)).into_response()
    }
}
