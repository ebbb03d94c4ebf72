//! Error types for the tenant gateway

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the tenant gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Tenant gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity service could not be reached or answered garbage
    #[error("Identity service error: {0}")]
    IdentityService(String),

    /// Forwarded backend call failed at the transport level
    #[error("Backend error: {0}")]
    Backend(String),

    /// Inbound request could not be forwarded as-is
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status reported to the client for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::IdentityService(_) | Self::Backend(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Never carries the underlying cause.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid request body",
            Self::IdentityService(_) | Self::Backend(_) => "backend unavailable",
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => "internal error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
