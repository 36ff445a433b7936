use thiserror::Error;

use crate::{providers::ProviderError, traits::LedgerError};

#[derive(Debug, Clone, Error)]
pub enum PaymentApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Invalid request: {0}")]
    ValidationError(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("Request rejected: {0}")]
    SecurityRejection(String),
    #[error("Too many payment requests. Try again in {retry_after} seconds")]
    RateLimited { retry_after: u64 },
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl From<LedgerError> for PaymentApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::TransactionNotFound(id) => PaymentApiError::NotFound(format!("Payment {id}")),
            LedgerError::OrderNotFound(id) => PaymentApiError::NotFound(format!("Order {id}")),
            LedgerError::InvalidTransition(msg) => PaymentApiError::ValidationError(msg),
            e => PaymentApiError::DatabaseError(e.to_string()),
        }
    }
}

impl From<ProviderError> for PaymentApiError {
    fn from(e: ProviderError) -> Self {
        PaymentApiError::ProviderUnavailable(e.to_string())
    }
}
