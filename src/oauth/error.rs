//! Failure taxonomy for the linking flow.

use crate::auth::IdentityError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

pub type LinkResult<T> = Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum LinkError {
    /// Provider registered but missing client id or secret
    #[error("OAuth not configured for provider '{provider}': {reason}")]
    Configuration { provider: String, reason: String },

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Missing '{0}' parameter")]
    MissingParameter(&'static str),

    /// `state` is not `<subject>:<token>`
    #[error("Invalid state parameter")]
    InvalidSessionState,

    /// Session token unknown, already consumed, or expired
    #[error("Invalid or expired session")]
    SessionNotFound,

    #[error("Session does not match this callback")]
    SessionMismatch,

    #[error("Authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    /// Token endpoint answered with a non-success status
    #[error("Token endpoint rejected the code exchange with status {status}: {body}")]
    UpstreamRejected { status: u16, body: String },

    #[error("Token endpoint unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Malformed token response: {0}")]
    MalformedTokenResponse(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Encryption failed: {0:#}")]
    Encryption(anyhow::Error),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl LinkError {
    pub fn configuration(provider: &str, reason: impl Into<String>) -> Self {
        LinkError::Configuration {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    /// HTTP status for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            LinkError::MissingParameter(_)
            | LinkError::InvalidSessionState
            | LinkError::SessionNotFound
            | LinkError::SessionMismatch
            | LinkError::AuthorizationDenied(_)
            | LinkError::UpstreamRejected { .. } => StatusCode::BAD_REQUEST,
            LinkError::Identity(_) => StatusCode::UNAUTHORIZED,
            LinkError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            LinkError::UpstreamUnreachable(_) | LinkError::MalformedTokenResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
            LinkError::Configuration { .. } | LinkError::Encryption(_) | LinkError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show the end user. Upstream bodies and internal causes
    /// stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            LinkError::UpstreamRejected { status, .. } => format!(
                "Authorization server rejected the code exchange (status {})",
                status
            ),
            LinkError::UpstreamUnreachable(_) => "Authorization server unreachable".to_string(),
            LinkError::MalformedTokenResponse(_) => {
                "Authorization server returned an invalid token response".to_string()
            }
            LinkError::Encryption(_) | LinkError::Storage(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for LinkError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.public_message(),
        });

        (status, body).into_response()
    }
}
