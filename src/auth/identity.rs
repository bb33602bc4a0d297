//! Identity verifiers: map an opaque bearer credential to a stable subject id.

use super::TokenError;
use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// A caller whose bearer credential has been checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    /// Stable, unique subject identifier
    pub subject: String,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{0}")]
    Token(#[from] TokenError),

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Authentication token expired")]
    Expired,

    #[error("Identity verification failed: {0}")]
    Verification(String),
}

/// Validates a bearer credential.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError>;
}

/// Claims read from an HS256 ID token.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: i64,
}

/// Verifies HS256-signed ID tokens with a shared secret.
pub struct JwtIdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Require the `iss` claim to equal `issuer`.
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// Require the `aud` claim to contain `audience`.
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let data = decode::<IdTokenClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "ID token rejected");
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => IdentityError::Expired,
                _ => IdentityError::InvalidToken,
            }
        })?;

        if data.claims.sub.is_empty() {
            return Err(IdentityError::InvalidToken);
        }

        Ok(VerifiedIdentity {
            subject: data.claims.sub,
            email: data.claims.email.filter(|e| !e.is_empty()),
        })
    }
}

/// Fixed token table, for local development and tests.
#[derive(Default)]
pub struct StaticIdentityVerifier {
    tokens: DashMap<String, VerifiedIdentity>,
}

impl StaticIdentityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: &str, subject: &str, email: Option<&str>) {
        self.tokens.insert(
            token.to_string(),
            VerifiedIdentity {
                subject: subject.to_string(),
                email: email.map(str::to_string),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        self.tokens
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or(IdentityError::InvalidToken)
    }
}
