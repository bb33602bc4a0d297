// HTTP API: account linking plus the small profile surface

pub mod links;
pub mod profile;

pub use links::{create_link_router, LinkAppState, OAuthCallback};
pub use profile::{create_profile_router, ProfileAppState};

use axum::http::{HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Complete router: linking routes and profile routes sharing one verifier.
pub fn create_router(state: LinkAppState) -> Router {
    let profile = ProfileAppState {
        verifier: state.verifier.clone(),
    };

    Router::new()
        .merge(create_link_router(state))
        .merge(create_profile_router(profile))
}

/// CORS for the configured origins. `*` allows any origin.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}
