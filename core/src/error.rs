//! Error taxonomy shared by every crate. Leaf errors classify themselves
//! into one of a handful of buckets so callers (the job pipeline, the API
//! layer) can decide retry/HTTP-status behavior without matching on
//! variant names.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("permanent upstream failure: {0}")]
    Permanent(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Whether the worker pipeline should re-enqueue the job that produced
    /// this error, as opposed to routing it straight to the dead-letter
    /// queue. `Internal` is treated as transient per spec.md §7: an
    /// uncaught error gets the same retry treatment, and only lands in the
    /// DLQ once it recurs past `max_attempts`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Internal(_))
    }

    pub fn to_status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Permanent(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_status();
        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR) {
            tracing::error!(error = %self, "internal error");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".into()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Error::Transient(format!("database unavailable: {e}"))
            }
            other => Error::Internal(other.into()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::Transient(format!("upstream request failed: {e}"))
        } else if let Some(status) = e.status() {
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Error::Transient(format!("upstream {status}: {e}"))
            } else {
                Error::Permanent(format!("upstream {status}: {e}"))
            }
        } else {
            Error::Permanent(e.to_string())
        }
    }
}
