//! The initiate/callback orchestration, independent of which provider is used.

use super::provider::ProviderRegistry;
use super::session::{redact, Clock, SessionRegistry, SystemClock};
use super::{LinkError, LinkResult};
use crate::auth::VerifiedIdentity;
use crate::credentials::{encrypt, CredentialStore};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where to send the browser to start linking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationRequest {
    pub auth_url: String,
    pub provider: String,
}

/// Result of a completed link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedAccount {
    pub provider: String,
    pub subject_id: String,
    pub user_id: i64,
    pub credential_id: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Splits `state` on the first colon into (claimed subject id, session token).
pub fn parse_state(state: &str) -> LinkResult<(&str, &str)> {
    match state.split_once(':') {
        Some((subject, token)) if !subject.is_empty() && !token.is_empty() => Ok((subject, token)),
        _ => Err(LinkError::InvalidSessionState),
    }
}

/// Ties providers, sessions, encryption and storage together.
#[derive(Clone)]
pub struct LinkService {
    providers: Arc<ProviderRegistry>,
    sessions: SessionRegistry,
    store: Arc<CredentialStore>,
    encryption_key: Arc<Vec<u8>>,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl LinkService {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        sessions: SessionRegistry,
        store: Arc<CredentialStore>,
        encryption_key: Vec<u8>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            providers,
            sessions,
            store,
            encryption_key: Arc::new(encryption_key),
            http,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock used to compute credential expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// HTTP client for token exchanges, bounded by `timeout_seconds`.
    pub fn http_client(timeout_seconds: u64) -> anyhow::Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(client)
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Starts a link for an authenticated caller.
    ///
    /// Configuration is checked before a session is created, so an
    /// unconfigured provider leaves nothing pending.
    pub fn initiate(
        &self,
        identity: &VerifiedIdentity,
        provider_name: &str,
    ) -> LinkResult<AuthorizationRequest> {
        let provider = self.providers.resolve(provider_name)?;
        provider.require_client_id().inspect_err(|_| {
            error!(provider = %provider.name, "OAuth client id not configured");
        })?;

        let token = self.sessions.create(
            &identity.subject,
            &provider.name,
            identity.email.as_deref(),
        );
        let state = format!("{}:{}", identity.subject, token);
        let auth_url = provider.build_authorize_url(&state)?;

        info!(
            provider = %provider.name,
            subject = %identity.subject,
            session = %redact(&token),
            "OAuth link initiated"
        );

        Ok(AuthorizationRequest {
            auth_url,
            provider: provider.name.clone(),
        })
    }

    /// Completes a link from the provider's redirect.
    ///
    /// Identity comes only from the session bound to `state`. Nothing is sent
    /// upstream and nothing is written unless that session is consumed
    /// successfully; the credential upsert is the last step.
    pub async fn callback(
        &self,
        code: &str,
        state: &str,
        provider_name: &str,
    ) -> LinkResult<LinkedAccount> {
        let (claimed_subject, token) = parse_state(state).inspect_err(|_| {
            warn!(provider = %provider_name, "Callback state is malformed");
        })?;

        let provider = self.providers.resolve(provider_name)?;

        let session = self
            .sessions
            .consume(token, claimed_subject, &provider.name)
            .inspect_err(|e| {
                warn!(
                    provider = %provider.name,
                    subject = %claimed_subject,
                    session = %redact(token),
                    error = %e,
                    "Callback session rejected"
                );
            })?;

        debug!(provider = %provider.name, subject = %session.subject_id, "Session validated");

        let tokens = provider
            .exchange_code(&self.http, code)
            .await
            .inspect_err(|e| {
                error!(
                    provider = %provider.name,
                    subject = %session.subject_id,
                    error = %e,
                    "Token exchange failed"
                );
            })?;

        let now = self.clock.now();
        // Absent or out-of-range lifetimes are stored as unknown, negatives as already expired
        let expires_at = tokens
            .expires_in
            .and_then(|seconds| Duration::try_seconds(seconds.max(0)))
            .and_then(|lifetime| now.checked_add_signed(lifetime));

        let access_token =
            encrypt(&tokens.access_token, &self.encryption_key).map_err(LinkError::Encryption)?;
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .map(|t| encrypt(t, &self.encryption_key))
            .transpose()
            .map_err(LinkError::Encryption)?;

        let user = self
            .store
            .find_or_create_user(&session.subject_id, session.email.as_deref())
            .map_err(LinkError::Storage)?;

        let credential = self
            .store
            .upsert_credential(
                user.id,
                &provider.name,
                &access_token,
                refresh_token.as_deref(),
                expires_at,
            )
            .map_err(LinkError::Storage)?;

        info!(
            provider = %provider.name,
            subject = %session.subject_id,
            user_id = user.id,
            has_refresh_token = refresh_token.is_some(),
            "OAuth link completed"
        );

        Ok(LinkedAccount {
            provider: provider.name.clone(),
            subject_id: session.subject_id,
            user_id: user.id,
            credential_id: credential.id,
            expires_at,
        })
    }

    /// Providers the caller has stored credentials for.
    pub fn linked_providers(&self, identity: &VerifiedIdentity) -> LinkResult<Vec<String>> {
        let Some(user) = self
            .store
            .get_user_by_subject(&identity.subject)
            .map_err(LinkError::Storage)?
        else {
            return Ok(vec![]);
        };

        self.store
            .list_providers_for_user(user.id)
            .map_err(LinkError::Storage)
    }
}
