use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;
use crate::utils::response::error as error_response;

/// Hard errors: the call is aborted and the caller sees the kind and message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Store error")]
    Store(#[from] StoreError),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::FailedPrecondition(_) => StatusCode::CONFLICT,
            AppError::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::PermissionDenied(_) => "PERMISSION_DENIED",
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::FailedPrecondition(_) => "FAILED_PRECONDITION",
            AppError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            AppError::Store(_) | AppError::Internal(_) => "INTERNAL",
        }
    }

    fn log(&self) {
        match self {
            AppError::Unauthenticated(msg)
            | AppError::PermissionDenied(msg)
            | AppError::InvalidArgument(msg)
            | AppError::NotFound(msg)
            | AppError::FailedPrecondition(msg)
            | AppError::ResourceExhausted(msg) => {
                tracing::debug!(code = self.code(), message = %msg, "Request rejected");
            }
            AppError::Store(e) => {
                error!(error = ?e, "Store error");
            }
            AppError::Internal(msg) => {
                error!(message = %msg, "Internal error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        // Store and internal details stay in the logs.
        let public_message = match &self {
            AppError::Unauthenticated(msg)
            | AppError::PermissionDenied(msg)
            | AppError::InvalidArgument(msg)
            | AppError::NotFound(msg)
            | AppError::FailedPrecondition(msg)
            | AppError::ResourceExhausted(msg) => msg.clone(),
            AppError::Store(_) | AppError::Internal(_) => {
                "The request could not be completed".to_string()
            }
        };

        error_response(code, public_message, None, status)
    }
}
