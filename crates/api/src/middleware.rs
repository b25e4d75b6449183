use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::debug;

use scopegate_auth::{AuthzError, JwtValidator};

use crate::app::errors::{self, ApiError};
use crate::app::services::AppService;
use crate::context::{PrincipalContext, TenantContext};

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
    pub service: AppService,
}

/// Validate the bearer token, then resolve the caller against the store.
///
/// The token only carries identity; a deactivated user or org is rejected
/// here even while its token is still within its time window.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers()).map_err(unauthorized)?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        debug!(error = %e, "bearer token rejected");
        unauthorized(StatusCode::UNAUTHORIZED)
    })?;

    let caller = state
        .service
        .resolve_caller(claims.sub)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    if caller.org_id != claims.org_id {
        debug!(user_id = %claims.sub, "token org does not match the user's org");
        return Err(ApiError::from(AuthzError::NotAuthenticated).into_response());
    }

    req.extensions_mut()
        .insert(TenantContext::new(caller.root_org_id));
    req.extensions_mut().insert(PrincipalContext::new(caller));

    Ok(next.run(req).await)
}

fn unauthorized(status: StatusCode) -> Response {
    errors::json_error(status, "not_authenticated", "missing or invalid bearer token")
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
