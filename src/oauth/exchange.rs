//! OAuth token exchange logic.
//!
//! Handles exchanging authorization codes for access tokens.

use super::provider::ProviderConfig;
use super::{LinkError, LinkResult};
use serde::Deserialize;
use serde_json::Value;

/// Largest token endpoint body that is buffered
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Tokens returned by a successful code exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds relative to the exchange, if the provider sent one
    pub expires_in: Option<i64>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Some providers send this as a string
    #[serde(default)]
    expires_in: Option<Value>,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_token_set(self) -> LinkResult<TokenSet> {
        if self.access_token.is_empty() {
            return Err(LinkError::MalformedTokenResponse(
                "empty access_token".to_string(),
            ));
        }

        let expires_in = match self.expires_in {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => Some(s.trim().parse::<i64>().map_err(|_| {
                LinkError::MalformedTokenResponse(format!("non-numeric expires_in '{}'", s))
            })?),
            Some(other) => {
                return Err(LinkError::MalformedTokenResponse(format!(
                    "unexpected expires_in value {}",
                    other
                )))
            }
        };

        Ok(TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_in,
        })
    }
}

impl ProviderConfig {
    /// Exchanges an authorization code at the provider's token endpoint.
    ///
    /// Client credentials are checked before any network access. The request
    /// timeout is whatever `http` was built with.
    pub async fn exchange_code(&self, http: &reqwest::Client, code: &str) -> LinkResult<TokenSet> {
        let client_id = self.require_client_id()?;
        let client_secret = self.require_client_secret()?;

        let form = [
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        tracing::debug!(provider = %self.name, token_url = %self.token_url, "Exchanging authorization code");

        let response = http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LinkError::UpstreamUnreachable(format!("request timed out: {}", e))
                } else {
                    LinkError::UpstreamUnreachable(e.to_string())
                }
            })?;

        let status = response.status();
        let body = read_limited(response, MAX_RESPONSE_BYTES).await?;

        if !status.is_success() {
            return Err(LinkError::UpstreamRejected {
                status: status.as_u16(),
                body: body.unwrap_or_else(|| "<body too large>".to_string()),
            });
        }

        let body = body.ok_or_else(|| {
            LinkError::MalformedTokenResponse(format!(
                "response exceeds {} bytes",
                MAX_RESPONSE_BYTES
            ))
        })?;

        let token_response: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| LinkError::MalformedTokenResponse(e.to_string()))?;

        let tokens = token_response.into_token_set()?;

        tracing::debug!(
            provider = %self.name,
            has_refresh_token = tokens.refresh_token.is_some(),
            expires_in = ?tokens.expires_in,
            "Token exchange successful"
        );

        Ok(tokens)
    }
}

/// Buffers the body up to `limit` bytes. `None` when it is larger.
async fn read_limited(mut response: reqwest::Response, limit: usize) -> LinkResult<Option<String>> {
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Ok(None);
    }

    let mut buf = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| LinkError::UpstreamUnreachable(format!("failed to read body: {}", e)))?
    {
        if buf.len() + chunk.len() > limit {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}
