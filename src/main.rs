use anyhow::{Context, Result};
use linkage::api::{cors_layer, create_router, LinkAppState};
use linkage::auth::{IdentityVerifier, JwtIdentityVerifier, StaticIdentityVerifier};
use linkage::config::{IdentityConfig, LinkageConfig};
use linkage::credentials::{validate_key, CredentialStore};
use linkage::oauth::{run_session_cleanup, LinkService, ProviderRegistry, SessionRegistry};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linkage=info".into()),
        )
        .init();

    info!("Linkage starting...");

    // Config path: first CLI argument, else LINKAGE_CONFIG, else defaults only
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LINKAGE_CONFIG").ok());
    let config = LinkageConfig::load(config_path.as_deref())?;

    let encryption_key = std::env::var("LINKAGE_ENCRYPTION_KEY")
        .context("LINKAGE_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
    let encryption_key =
        validate_key(&encryption_key).context("LINKAGE_ENCRYPTION_KEY is invalid")?;

    info!(
        config = config_path.as_deref().unwrap_or("<defaults>"),
        bind_addr = %config.server.bind_addr,
        database = %config.database.path,
        session_ttl_seconds = config.sessions.ttl_seconds,
        "Configuration loaded"
    );

    let store = Arc::new(
        CredentialStore::new(&config.database.path)
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    let providers = Arc::new(ProviderRegistry::from_settings(&config.oauth));
    for provider in providers.all() {
        if provider.is_configured() {
            info!(provider = %provider.name, aliases = ?provider.aliases, "OAuth provider ready");
        } else {
            warn!(
                provider = %provider.name,
                "OAuth client id/secret not set; linking this provider will fail"
            );
        }
    }

    let sessions = SessionRegistry::new(config.sessions.ttl_seconds)
        .context("Invalid session TTL")?;
    tokio::spawn(run_session_cleanup(
        sessions.clone(),
        config.sessions.cleanup_interval_seconds,
    ));

    let http = LinkService::http_client(config.oauth.http_timeout_seconds)
        .context("Failed to build HTTP client")?;
    let service = Arc::new(LinkService::new(
        providers,
        sessions,
        store,
        encryption_key,
        http,
    ));

    let verifier = build_verifier(&config.identity);

    let router = create_router(LinkAppState { service, verifier })
        .layer(cors_layer(&config.server.cors_allowed_origins));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Linkage API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Linkage API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Linkage stopped");

    Ok(())
}

/// JWT verification when `LINKAGE_JWT_SECRET` is set, otherwise the static
/// token table from config.
fn build_verifier(identity: &IdentityConfig) -> Arc<dyn IdentityVerifier> {
    match std::env::var("LINKAGE_JWT_SECRET")
        .ok()
        .filter(|s| !s.is_empty())
    {
        Some(secret) => {
            let mut verifier = JwtIdentityVerifier::new(&secret);
            if let Some(issuer) = &identity.issuer {
                verifier = verifier.with_issuer(issuer);
            }
            if let Some(audience) = &identity.audience {
                verifier = verifier.with_audience(audience);
            }
            info!("Identity verification: HS256 JWT");
            Arc::new(verifier)
        }
        None => {
            let verifier = StaticIdentityVerifier::new();
            for entry in &identity.static_tokens {
                verifier.insert(&entry.token, &entry.subject, entry.email.as_deref());
            }
            warn!(
                tokens = verifier.len(),
                "LINKAGE_JWT_SECRET not set; using static bearer tokens (development only)"
            );
            Arc::new(verifier)
        }
    }
}
