use huddle_db::store::StoreError;
use thiserror::Error;

use crate::dao::base::DaoError;

/// Failures surfaced by the chat core.
///
/// `Validation` is raised before any write. `Conflict` and `NotFound` come
/// with a repair already attempted where one exists. `Transient` is left to
/// the caller to retry.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Validation: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Transient(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::Transient(_))
    }
}

impl From<DaoError> for ChatError {
    fn from(err: DaoError) -> Self {
        match err {
            DaoError::NotFound => ChatError::NotFound("Resource not found".to_string()),
            DaoError::DuplicateKey(msg) => ChatError::Conflict(msg),
            DaoError::Validation(msg) => ChatError::Validation(msg),
            DaoError::Store(e) => ChatError::Transient(e.to_string()),
            DaoError::BsonSer(e) => ChatError::Transient(e.to_string()),
            DaoError::BsonDe(e) => ChatError::Transient(e.to_string()),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        DaoError::from(err).into()
    }
}
