//! Caller identity for the linking endpoints.
//!
//! Bearer extraction is plain header parsing. Turning the bearer value into a
//! subject id is delegated to an [`IdentityVerifier`].

mod identity;

pub use identity::{
    IdTokenClaims, IdentityError, IdentityVerifier, JwtIdentityVerifier,
    StaticIdentityVerifier, VerifiedIdentity,
};

use axum::http::HeaderMap;
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Returns the token string if present and valid.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Extracts the bearer token and verifies it.
pub async fn authenticate(
    headers: &HeaderMap,
    verifier: &dyn IdentityVerifier,
) -> Result<VerifiedIdentity, IdentityError> {
    let token = extract_bearer_token(headers)?;
    verifier.verify(&token).await
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone, Error)]
pub enum TokenError {
    /// Authorization header not present
    #[error("Authorization token not provided")]
    Missing,
    /// Not "Bearer <token>"
    #[error("Invalid authorization token format")]
    InvalidFormat,
    #[error("Authorization token is empty")]
    Empty,
}
