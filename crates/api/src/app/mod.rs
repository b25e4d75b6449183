//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and the shared authorization service
//! - `routes/`: HTTP routes + handlers (one file per management area)
//! - `dto.rs`: request DTOs that are not domain inputs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use scopegate_auth::Hs256JwtValidator;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppService;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let service = services::build_service(config).await?;
    Ok(build_router(service, &config.jwt_secret))
}

/// Router over an already-wired service.
pub fn build_router(service: AppService, jwt_secret: &str) -> Router {
    let jwt = Arc::new(Hs256JwtValidator::new(jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState {
        jwt,
        service: service.clone(),
    };

    // Protected routes: require a valid token and an active caller.
    let protected = routes::router()
        .layer(Extension(service))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
