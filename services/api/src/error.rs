//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and how port
//! errors surface to HTTP clients.

use axum::http::StatusCode;
use diet_assistant_core::ports::PortError;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// The schema could not be brought up to date at startup.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The HTTP status a REST handler answers with for a given port failure.
pub fn status_for(error: &PortError) -> StatusCode {
    match error {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::AlreadyExists(_) => StatusCode::CONFLICT,
        PortError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
        PortError::Unauthorized => StatusCode::FORBIDDEN,
        PortError::MissingCredential | PortError::UnsupportedContent(_) => StatusCode::BAD_REQUEST,
        PortError::ExternalCall(_) => StatusCode::BAD_GATEWAY,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Shorthand used by handlers returning `(StatusCode, String)`.
pub fn port_rejection(error: PortError) -> (StatusCode, String) {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", error);
    }
    (status, error.to_string())
}
