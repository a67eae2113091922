use thiserror::Error;
use whispr_types::api::{
    ERR_CONFLICT, ERR_CONSTRAINT, ERR_FORBIDDEN, ERR_INTERNAL, ERR_INVALID, ERR_NOT_FOUND,
    StoreFailure,
};

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{column}' on '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("invalid value for '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("refusing to {0} without a filter")]
    Unfiltered(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// The row was already moved on by someone else.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("unknown procedure '{0}'")]
    UnknownProcedure(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("row decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("database lock poisoned")]
    LockPoisoned,
}

impl DbError {
    /// Stable code reported across the HTTP boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ERR_CONSTRAINT
            }
            Self::Sqlite(_) | Self::Decode(_) | Self::LockPoisoned => ERR_INTERNAL,
            Self::UnknownTable(_)
            | Self::UnknownColumn { .. }
            | Self::InvalidValue { .. }
            | Self::Unfiltered(_)
            | Self::UnknownProcedure(_)
            | Self::InvalidParams(_) => ERR_INVALID,
            Self::NotFound(_) => ERR_NOT_FOUND,
            Self::Conflict(_) => ERR_CONFLICT,
            Self::Forbidden(_) => ERR_FORBIDDEN,
        }
    }

    pub fn to_failure(&self) -> StoreFailure {
        StoreFailure {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
