use thiserror::Error;
use whispr_db::DbError;
use whispr_types::api::{ERR_CONFLICT, ERR_NOT_FOUND, StoreFailure};

/// Everything a gateway call can fail with.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The store could not be reached, or the exchange broke off.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store refused the request.
    #[error("store error ({code}): {message}")]
    Store { code: String, message: String },

    /// Someone else moved the row first. Refetch and carry on.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("authentication required: {0}")]
    Auth(String),

    #[error("malformed row: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Only transport failures are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Store error code, if the store produced this error.
    pub fn store_code(&self) -> Option<&str> {
        match self {
            Self::Store { code, .. } => Some(code),
            _ => None,
        }
    }

    pub(crate) fn not_found(what: &str) -> Self {
        Self::Store {
            code: ERR_NOT_FOUND.to_string(),
            message: format!("{} not found", what),
        }
    }

    /// Lift a store "already moved on" signal into [`ClientError::Conflict`].
    pub(crate) fn into_conflict(self, message: &str) -> Self {
        match self.store_code() {
            Some(ERR_CONFLICT) | Some(ERR_NOT_FOUND) => Self::Conflict(message.to_string()),
            _ => self,
        }
    }
}

impl From<StoreFailure> for ClientError {
    fn from(failure: StoreFailure) -> Self {
        Self::Store {
            code: failure.code,
            message: failure.message,
        }
    }
}

impl From<DbError> for ClientError {
    fn from(err: DbError) -> Self {
        err.to_failure().into()
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whispr_types::api::ERR_CONSTRAINT;

    fn store(code: &str) -> ClientError {
        StoreFailure {
            code: code.into(),
            message: "refused".into(),
        }
        .into()
    }

    #[test]
    fn only_transport_is_retryable() {
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(!store(ERR_CONSTRAINT).is_retryable());
        assert!(!ClientError::Conflict("taken".into()).is_retryable());
        assert!(!ClientError::Auth("expired".into()).is_retryable());
    }

    #[test]
    fn conflict_translation_leaves_other_failures_alone() {
        assert!(store(ERR_CONFLICT).into_conflict("gone").is_conflict());
        assert!(store(ERR_NOT_FOUND).into_conflict("gone").is_conflict());

        let constraint = store(ERR_CONSTRAINT).into_conflict("gone");
        assert_eq!(constraint.store_code(), Some(ERR_CONSTRAINT));
        assert!(ClientError::Transport("down".into()).into_conflict("gone").is_retryable());
    }
}
