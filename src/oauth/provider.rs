//! OAuth provider configurations.
//!
//! A provider is pure data: endpoints, scopes and client credentials. Adding a
//! provider means adding one [`ProviderConfig`]; nothing in the flow branches
//! on provider names.

use super::{LinkError, LinkResult};
use crate::config::{OAuthSettings, ProviderSettings};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// OAuth provider configuration, immutable after load.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Canonical provider name, also the credential discriminator ("outlook")
    pub name: String,

    /// Alternative route names ("email")
    pub aliases: Vec<String>,

    /// Client ID (from environment variable)
    pub client_id: Option<String>,

    /// Client secret (from environment variable)
    pub client_secret: Option<String>,

    /// Space-delimited scope list
    pub scopes: String,

    pub redirect_uri: String,

    /// OAuth authorization endpoint URL
    pub authorize_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("scopes", &self.scopes)
            .field("redirect_uri", &self.redirect_uri)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

impl ProviderConfig {
    /// Builds a provider from file settings plus environment secrets.
    ///
    /// Reads `LINKAGE_OAUTH_<NAME>_CLIENT_ID` and `LINKAGE_OAUTH_<NAME>_CLIENT_SECRET`.
    /// Missing secrets are kept as `None` and reported when the provider is used.
    pub fn from_settings(settings: &ProviderSettings, redirect_base_url: &str) -> Self {
        let env_prefix = settings.name.to_uppercase().replace('-', "_");
        let client_id = env_non_empty(&format!("LINKAGE_OAUTH_{}_CLIENT_ID", env_prefix));
        let client_secret = env_non_empty(&format!("LINKAGE_OAUTH_{}_CLIENT_SECRET", env_prefix));

        let redirect_uri = settings.redirect_uri.clone().unwrap_or_else(|| {
            format!(
                "{}/auth/callback/{}",
                redirect_base_url.trim_end_matches('/'),
                settings.name
            )
        });

        Self {
            name: settings.name.to_lowercase(),
            aliases: settings.aliases.iter().map(|a| a.to_lowercase()).collect(),
            client_id,
            client_secret,
            scopes: settings.scopes.clone(),
            redirect_uri,
            authorize_url: settings.authorize_url.clone(),
            token_url: settings.token_url.clone(),
        }
    }

    /// Both client id and secret are set and non-empty.
    pub fn is_configured(&self) -> bool {
        self.require_client_id().is_ok() && self.require_client_secret().is_ok()
    }

    pub(crate) fn require_client_id(&self) -> LinkResult<&str> {
        self.client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| LinkError::configuration(&self.name, "client id not set"))
    }

    pub(crate) fn require_client_secret(&self) -> LinkResult<&str> {
        self.client_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| LinkError::configuration(&self.name, "client secret not set"))
    }

    /// Builds the authorization URL the browser is sent to.
    ///
    /// `state` is passed through verbatim (URL-encoded). No network access.
    pub fn build_authorize_url(&self, state: &str) -> LinkResult<String> {
        let client_id = self.require_client_id()?;

        let separator = if self.authorize_url.contains('?') { '&' } else { '?' };

        Ok(format!(
            "{}{}client_id={}&response_type=code&redirect_uri={}&scope={}&state={}",
            self.authorize_url,
            separator,
            urlencoding::encode(client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.scopes),
            urlencoding::encode(state)
        ))
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Provider lookup by canonical name or alias.
#[derive(Debug, Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<ProviderConfig>>,
    aliases: HashMap<String, String>,
}

impl ProviderRegistry {
    pub fn new(configs: impl IntoIterator<Item = ProviderConfig>) -> Self {
        let mut registry = Self::default();
        for config in configs {
            registry.insert(config);
        }
        registry
    }

    pub fn from_settings(settings: &OAuthSettings) -> Self {
        Self::new(
            settings
                .providers
                .iter()
                .map(|p| ProviderConfig::from_settings(p, &settings.redirect_base_url)),
        )
    }

    pub fn insert(&mut self, config: ProviderConfig) {
        for alias in &config.aliases {
            self.aliases.insert(alias.clone(), config.name.clone());
        }
        self.providers.insert(config.name.clone(), Arc::new(config));
    }

    /// Resolves a route name (canonical or alias) to its provider.
    pub fn resolve(&self, name: &str) -> LinkResult<Arc<ProviderConfig>> {
        let name = name.to_lowercase();
        let canonical = self.aliases.get(&name).unwrap_or(&name);

        self.providers
            .get(canonical)
            .cloned()
            .ok_or(LinkError::UnknownProvider(name))
    }

    /// All providers, sorted by name.
    pub fn all(&self) -> Vec<Arc<ProviderConfig>> {
        let mut providers: Vec<_> = self.providers.values().cloned().collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
