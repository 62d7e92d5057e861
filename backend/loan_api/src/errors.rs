//! Application-wide error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use loan_protocol::LoanError;
use thiserror::Error;
use tracing::error;

use crate::api::ApiResponse;

/// Startup and infrastructure failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Webhook rejected notification: {0}")]
    Webhook(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Failure of a single API request.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Loan(#[from] LoanError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Loan(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Loan(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Loan(LoanError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Loan(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {self}");
        }
        (
            status,
            Json(ApiResponse::<()>::error(status, self.to_string())),
        )
            .into_response()
    }
}
