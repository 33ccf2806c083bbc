//! The payment state machine's own error taxonomy, converted to the wire
//! [`ApiError`] at the one seam `caseloot-server`'s handlers call through.

use caseloot_error::{ApiError, ApiErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("antifraud denied this request: {0}")]
    AntifraudBlocked(&'static str),
    #[error("case {0:?} not found or failed validation")]
    UnknownCase(String),
    #[error("invoice payload could not be decoded: {0}")]
    InvalidInvoicePayload(#[from] caseloot_telegram::InvoicePayloadError),
    #[error("wrong currency: expected XTR, got {0}")]
    WrongCurrency(String),
    #[error("amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch { expected: i64, actual: i64 },
    #[error(transparent)]
    Store(#[from] caseloot_storage::StoreError),
    #[error(transparent)]
    Rng(#[from] caseloot_rng::RngError),
    #[error(transparent)]
    Client(#[from] caseloot_telegram::ClientError),
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match &err {
            PaymentError::AntifraudBlocked(tag) => ApiError::antifraud_deny(tag),
            PaymentError::UnknownCase(_) => ApiError::client_input("unknown case", err.to_string()),
            PaymentError::InvalidInvoicePayload(_) => {
                ApiError::client_input("invalid invoice payload", err.to_string())
            }
            PaymentError::WrongCurrency(_) | PaymentError::AmountMismatch { .. } => {
                ApiError::client_input("invalid payment", err.to_string())
            }
            PaymentError::Store(_) | PaymentError::Rng(_) => ApiError::internal(err.to_string()),
            PaymentError::Client(client_err) if client_err.is_retryable() => {
                ApiError::new(ApiErrorKind::TransientRemote, "telegram_unavailable", err.to_string())
            }
            PaymentError::Client(_) => {
                ApiError::new(ApiErrorKind::PermanentRemote, "telegram_rejected", err.to_string())
            }
        }
    }
}
