//! OAuth account-linking endpoints.
//!
//! Flow:
//! 1. Authenticated client calls `POST /auth/initiate/:provider` and receives `auth_url`
//! 2. Browser is sent to the provider, the user approves
//! 3. Provider redirects to `GET /auth/callback/:provider?code=..&state=..`
//! 4. Code is exchanged and the encrypted credential is stored

use crate::auth::{authenticate, IdentityVerifier};
use crate::oauth::{LinkError, LinkService};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{Json, Redirect},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared application state for the linking API
#[derive(Clone)]
pub struct LinkAppState {
    pub service: Arc<LinkService>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitiateResponse {
    auth_url: String,
    provider: String,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    message: String,
    provider: String,
}

#[derive(Debug, Serialize)]
pub struct LinkSummary {
    provider: String,
}

#[derive(Debug, Serialize)]
pub struct LinksResponse {
    links: Vec<LinkSummary>,
}

#[derive(Debug, Serialize)]
pub struct ProviderSummary {
    name: String,
    aliases: Vec<String>,
    /// Whether both client id and secret are set
    configured: bool,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    providers: Vec<ProviderSummary>,
}

/// Create linking API router
pub fn create_link_router(state: LinkAppState) -> Router {
    Router::new()
        .route("/auth/initiate/:provider", post(initiate_link))
        .route("/auth/callback/:provider", get(link_callback))
        .route(
            "/auth/connect/:provider",
            get(connect_redirect).post(connect_redirect),
        )
        .route("/auth/links", get(list_links))
        .route("/auth/providers", get(list_providers))
        .with_state(Arc::new(state))
}

/// POST /auth/initiate/:provider
///
/// Requires a bearer identity.
async fn initiate_link(
    State(state): State<Arc<LinkAppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<InitiateResponse>, LinkError> {
    let identity = authenticate(&headers, state.verifier.as_ref()).await?;
    debug!(provider = %provider, subject = %identity.subject, "Link initiate requested");

    let request = state.service.initiate(&identity, &provider)?;

    Ok(Json(InitiateResponse {
        auth_url: request.auth_url,
        provider: request.provider,
    }))
}

/// GET /auth/callback/:provider
///
/// No bearer: the caller is the provider's redirect, identity comes from the
/// session bound to `state`.
async fn link_callback(
    State(state): State<Arc<LinkAppState>>,
    Path(provider): Path<String>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Json<CallbackResponse>, LinkError> {
    debug!(provider = %provider, "OAuth callback received");

    // The session is left pending; TTL eviction removes it
    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(
            provider = %provider,
            error = %error,
            description = %description,
            "OAuth authorization denied"
        );
        return Err(LinkError::AuthorizationDenied(format!(
            "{} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .filter(|c| !c.is_empty())
        .ok_or(LinkError::MissingParameter("code"))?;
    let link_state = callback
        .state
        .filter(|s| !s.is_empty())
        .ok_or(LinkError::MissingParameter("state"))?;

    let linked = state.service.callback(&code, &link_state, &provider).await?;

    Ok(Json(CallbackResponse {
        message: format!("Successfully linked {}", linked.provider),
        provider: linked.provider,
    }))
}

/// /auth/connect/:provider
///
/// Deprecated alias kept for older clients. The 308 preserves method and
/// body, so only a POST with a bearer header reaches a working route.
async fn connect_redirect(Path(provider): Path<String>) -> Redirect {
    warn!(provider = %provider, "Deprecated /auth/connect route used");
    Redirect::permanent(&format!(
        "/auth/initiate/{}",
        urlencoding::encode(&provider)
    ))
}

/// GET /auth/links
async fn list_links(
    State(state): State<Arc<LinkAppState>>,
    headers: HeaderMap,
) -> Result<Json<LinksResponse>, LinkError> {
    let identity = authenticate(&headers, state.verifier.as_ref()).await?;

    let links = state
        .service
        .linked_providers(&identity)?
        .into_iter()
        .map(|provider| LinkSummary { provider })
        .collect();

    Ok(Json(LinksResponse { links }))
}

/// GET /auth/providers
async fn list_providers(State(state): State<Arc<LinkAppState>>) -> Json<ProvidersResponse> {
    let providers = state
        .service
        .providers()
        .all()
        .into_iter()
        .map(|p| ProviderSummary {
            name: p.name.clone(),
            aliases: p.aliases.clone(),
            configured: p.is_configured(),
        })
        .collect();

    Json(ProvidersResponse { providers })
}
