use actix_web::{
    error::ResponseError,
    http::{header, header::ContentType, StatusCode},
    HttpResponse,
};
use payflow_engine::PaymentApiError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("Not authenticated. {0}")]
    Unauthenticated(String),
    #[error("Invalid request signature. {0}")]
    InvalidSignature(String),
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("Invalid request. {0}")]
    ValidationError(String),
    #[error("Request rejected. {0}")]
    SecurityRejection(String),
    #[error("Too many payment requests. Try again in {retry_after} seconds.")]
    RateLimited { retry_after: u64 },
    #[error("The payment provider is unavailable. {0}")]
    ProviderUnavailable(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidSignature(_) => StatusCode::FORBIDDEN,
            Self::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::SecurityRejection(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        response.insert_header(ContentType::json());
        let body = match self {
            Self::RateLimited { retry_after } => {
                response.insert_header((header::RETRY_AFTER, retry_after.to_string()));
                json!({ "error": self.to_string(), "retryAfter": retry_after })
            },
            _ => json!({ "error": self.to_string() }),
        };
        response.body(body.to_string())
    }
}

impl From<PaymentApiError> for ServerError {
    fn from(e: PaymentApiError) -> Self {
        match e {
            PaymentApiError::DatabaseError(s) => Self::BackendError(format!("Database error: {s}")),
            PaymentApiError::ValidationError(s) => Self::ValidationError(s),
            PaymentApiError::Forbidden(s) => Self::InsufficientPermissions(s),
            PaymentApiError::NotFound(s) => Self::NoRecordFound(format!("{s} does not exist")),
            PaymentApiError::SecurityRejection(s) => Self::SecurityRejection(s),
            PaymentApiError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            PaymentApiError::ProviderUnavailable(s) => Self::ProviderUnavailable(s),
        }
    }
}
