use crate::auth::{authenticate, IdentityError, IdentityVerifier};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct ProfileAppState {
    pub verifier: Arc<dyn IdentityVerifier>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    message: String,
    user_id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

struct Unauthorized(IdentityError);

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "Profile request rejected");
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

pub fn create_profile_router(state: ProfileAppState) -> Router {
    Router::new()
        .route("/api", get(welcome))
        .route("/api/profile", get(profile))
        .with_state(Arc::new(state))
}

/// GET /api
async fn welcome() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Welcome to the Linkage API" }))
}

/// GET /api/profile
async fn profile(
    State(state): State<Arc<ProfileAppState>>,
    headers: HeaderMap,
) -> Result<Json<ProfileResponse>, Unauthorized> {
    let identity = authenticate(&headers, state.verifier.as_ref())
        .await
        .map_err(Unauthorized)?;

    Ok(Json(ProfileResponse {
        message: "Authenticated".to_string(),
        user_id: identity.subject,
    }))
}
