//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{AccountError, AggregateError, ExecuteError};
use event_store::EventStoreError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    /// The account rejected the command.
    Rejected(AccountError),
    /// The aggregate runtime failed to run the command.
    Aggregate(AggregateError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Rejected(err) => (rejection_status(&err), err.to_string()),
            ApiError::Aggregate(err) => aggregate_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn rejection_status(err: &AccountError) -> StatusCode {
    match err {
        AccountError::NotOpen => StatusCode::NOT_FOUND,
        AccountError::OwnerRequired | AccountError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        AccountError::AlreadyOpen
        | AccountError::Closed
        | AccountError::InsufficientFunds { .. }
        | AccountError::BalanceOverflow { .. }
        | AccountError::NonZeroBalance(_) => StatusCode::CONFLICT,
    }
}

fn aggregate_error_to_response(err: AggregateError) -> (StatusCode, String) {
    if err.is_concurrency_conflict() {
        return (StatusCode::CONFLICT, err.to_string());
    }
    match err {
        AggregateError::Timeout { .. } => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        err => {
            tracing::error!(error = %err, "aggregate runtime error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<ExecuteError<AccountError>> for ApiError {
    fn from(err: ExecuteError<AccountError>) -> Self {
        match err {
            ExecuteError::Rejected(rejection) => ApiError::Rejected(rejection),
            ExecuteError::Aggregate(err) => ApiError::Aggregate(err),
        }
    }
}

impl From<AggregateError> for ApiError {
    fn from(err: AggregateError) -> Self {
        ApiError::Aggregate(err)
    }
}

impl From<EventStoreError> for ApiError {
    fn from(err: EventStoreError) -> Self {
        ApiError::Aggregate(AggregateError::EventStore(err))
    }
}

/// Failures while bringing the server up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to install Prometheus recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to connect to the database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
