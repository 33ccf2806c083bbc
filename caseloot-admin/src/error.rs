//! The admin surface's own error taxonomy, converted to the wire
//! [`ApiError`] at the one seam `caseloot-server`'s handlers call through.

use caseloot_error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("missing or invalid X-Admin-Token")]
    Unauthorized,
    #[error("case {0:?} not found")]
    UnknownCase(String),
    #[error(transparent)]
    Store(#[from] caseloot_storage::StoreError),
    #[error(transparent)]
    Load(#[from] caseloot_cases::LoadError),
    #[error(transparent)]
    Client(#[from] caseloot_telegram::ClientError),
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        match &err {
            AdminError::Unauthorized => ApiError::forbidden("unauthorized", err.to_string()),
            AdminError::UnknownCase(_) => ApiError::client_input("unknown case", err.to_string()),
            AdminError::Store(_) | AdminError::Load(_) => ApiError::internal(err.to_string()),
            AdminError::Client(_) => ApiError::internal(err.to_string()),
        }
    }
}
