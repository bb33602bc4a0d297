use serde::Deserialize;
use std::path::Path;

/// Complete Linkage configuration
///
/// Every section is optional in the file. Secrets (client credentials, the
/// encryption key, the JWT secret) are never read from here, only from the
/// environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkageConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: Vec<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_cors_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors_allowed_origins: default_cors_allowed_origins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "linkage.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Pending OAuth session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// How long an initiated link may wait for its callback (seconds)
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: i64,
    /// How often expired sessions are evicted (seconds)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

fn default_session_ttl() -> i64 {
    600
}

fn default_cleanup_interval() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

/// OAuth configuration: outbound HTTP plus the provider table
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSettings {
    /// Timeout for token endpoint calls (seconds)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    /// Public base URL used to derive default redirect URIs
    #[serde(default = "default_redirect_base_url")]
    pub redirect_base_url: String,
    /// Replaces the built-in provider table when present
    #[serde(default = "builtin_providers")]
    pub providers: Vec<ProviderSettings>,
}

fn default_http_timeout() -> u64 {
    15
}

fn default_redirect_base_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            http_timeout_seconds: default_http_timeout(),
            redirect_base_url: default_redirect_base_url(),
            providers: builtin_providers(),
        }
    }
}

/// Non-secret description of one OAuth provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Space-delimited scope list
    pub scopes: String,
    pub authorize_url: String,
    pub token_url: String,
    /// Defaults to `{redirect_base_url}/auth/callback/{name}`
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// Providers available without any `[[oauth.providers]]` entries
pub fn builtin_providers() -> Vec<ProviderSettings> {
    vec![
        ProviderSettings {
            name: "outlook".to_string(),
            aliases: vec!["email".to_string()],
            scopes: "openid profile email offline_access Mail.ReadWrite Mail.Send Calendars.ReadWrite"
                .to_string(),
            authorize_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
                .to_string(),
            token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
            redirect_uri: None,
        },
        ProviderSettings {
            name: "pipedrive".to_string(),
            aliases: vec!["crm".to_string()],
            scopes: "base deals:full contacts:full".to_string(),
            authorize_url: "https://oauth.pipedrive.com/oauth/authorize".to_string(),
            token_url: "https://oauth.pipedrive.com/oauth/token".to_string(),
            redirect_uri: None,
        },
    ]
}

/// Caller identity configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
    /// Required `iss` claim, if set
    #[serde(default)]
    pub issuer: Option<String>,
    /// Required `aud` claim, if set
    #[serde(default)]
    pub audience: Option<String>,
    /// Fixed bearer tokens, used only when no JWT secret is configured
    #[serde(default)]
    pub static_tokens: Vec<StaticToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticToken {
    pub token: String,
    pub subject: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl LinkageConfig {
    /// Loads from `path` if given (defaults otherwise), then applies
    /// environment overrides.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => load_config(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make the service unusable.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sessions.ttl_seconds <= 0 {
            anyhow::bail!(
                "sessions.ttl_seconds must be positive, got {}",
                self.sessions.ttl_seconds
            );
        }
        Ok(())
    }

    /// Applies `LINKAGE_*` overrides using `lookup` to read variables.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = lookup("LINKAGE_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Some(path) = lookup("LINKAGE_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(url) = lookup("LINKAGE_REDIRECT_BASE_URL") {
            self.oauth.redirect_base_url = url;
        }
        if let Some(ttl) = lookup("LINKAGE_SESSION_TTL_SECONDS") {
            match ttl.trim().parse::<i64>() {
                Ok(seconds) if seconds > 0 => self.sessions.ttl_seconds = seconds,
                _ => tracing::warn!(value = %ttl, "Ignoring invalid LINKAGE_SESSION_TTL_SECONDS"),
            }
        }
        if let Some(timeout) = lookup("LINKAGE_OAUTH_HTTP_TIMEOUT_SECONDS") {
            match timeout.trim().parse() {
                Ok(timeout) => self.oauth.http_timeout_seconds = timeout,
                Err(_) => tracing::warn!(
                    value = %timeout,
                    "Ignoring invalid LINKAGE_OAUTH_HTTP_TIMEOUT_SECONDS"
                ),
            }
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<LinkageConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
    let config: LinkageConfig = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LinkageConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.server.cors_allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.database.path, "linkage.db");
        assert_eq!(config.sessions.ttl_seconds, 600);
        assert_eq!(config.sessions.cleanup_interval_seconds, 60);
        assert_eq!(config.oauth.http_timeout_seconds, 15);

        let names: Vec<_> = config.oauth.providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["outlook", "pipedrive"]);
        assert!(config.identity.static_tokens.is_empty());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: LinkageConfig = toml::from_str("").unwrap();
        assert_eq!(config.sessions.ttl_seconds, 600);
        assert_eq!(config.oauth.providers.len(), 2);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:9000"

            [database]
            path = "/var/lib/linkage/links.db"

            [sessions]
            ttl_seconds = 300

            [oauth]
            redirect_base_url = "https://links.example.com"

            [[oauth.providers]]
            name = "hubspot"
            aliases = ["marketing"]
            scopes = "crm.objects.contacts.read"
            authorize_url = "https://app.hubspot.com/oauth/authorize"
            token_url = "https://api.hubapi.com/oauth/v1/token"

            [identity]
            issuer = "https://id.example.com"

            [[identity.static_tokens]]
            token = "dev-token"
            subject = "u1"
            email = "u1@example.com"
        "#;

        let config: LinkageConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        // Unspecified fields in a present section still default
        assert_eq!(config.server.cors_allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.database.path, "/var/lib/linkage/links.db");
        assert_eq!(config.sessions.ttl_seconds, 300);
        assert_eq!(config.sessions.cleanup_interval_seconds, 60);
        assert_eq!(config.oauth.http_timeout_seconds, 15);

        assert_eq!(config.oauth.providers.len(), 1);
        let hubspot = &config.oauth.providers[0];
        assert_eq!(hubspot.name, "hubspot");
        assert_eq!(hubspot.aliases, vec!["marketing"]);
        assert!(hubspot.redirect_uri.is_none());

        assert_eq!(config.identity.issuer.as_deref(), Some("https://id.example.com"));
        assert_eq!(config.identity.static_tokens[0].subject, "u1");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LINKAGE_BIND_ADDR", "127.0.0.1:7000"),
            ("LINKAGE_DATABASE_PATH", "/tmp/links.db"),
            ("LINKAGE_SESSION_TTL_SECONDS", "120"),
            ("LINKAGE_OAUTH_HTTP_TIMEOUT_SECONDS", "not-a-number"),
            ("LINKAGE_REDIRECT_BASE_URL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = LinkageConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.bind_addr, "127.0.0.1:7000");
        assert_eq!(config.database.path, "/tmp/links.db");
        assert_eq!(config.sessions.ttl_seconds, 120);
        // Invalid and empty values leave defaults in place
        assert_eq!(config.oauth.http_timeout_seconds, 15);
        assert_eq!(config.oauth.redirect_base_url, "http://localhost:8080");
    }

    #[test]
    fn test_env_ttl_must_be_positive() {
        for value in ["0", "-30"] {
            let mut config = LinkageConfig::default();
            config.apply_env_overrides(|key| {
                (key == "LINKAGE_SESSION_TTL_SECONDS").then(|| value.to_string())
            });
            assert_eq!(config.sessions.ttl_seconds, 600);
        }
    }

    #[test]
    fn test_validate_rejects_non_positive_ttl() {
        let config: LinkageConfig = toml::from_str("[sessions]\nttl_seconds = 0").unwrap();
        assert!(config.validate().is_err());

        let config: LinkageConfig = toml::from_str("[sessions]\nttl_seconds = -5").unwrap();
        assert!(config.validate().is_err());

        assert!(LinkageConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_rejects_non_positive_ttl_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sessions]\nttl_seconds = 0").unwrap();

        let path = file.path().to_str().unwrap();
        assert!(LinkageConfig::load(Some(path)).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sessions]\nttl_seconds = 30").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.sessions.ttl_seconds, 30);
    }

    #[test]
    fn test_load_config_errors() {
        assert!(load_config("/nonexistent/linkage.toml").is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sessions\nttl_seconds = ").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
