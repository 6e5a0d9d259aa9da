//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and the authorization services
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: `AccessError` to status code mapping

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<services::AppServices>, jwt_secret: String) -> Router {
    let jwt = Arc::new(docket_auth::Hs256JwtValidator::new(jwt_secret.into_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Organization-scoped routes need a resolved tenant context on top of
    // authentication.
    let tenant_scoped = routes::tenant_router().layer(axum::middleware::from_fn_with_state(
        Arc::clone(&services),
        middleware::tenant_middleware,
    ));

    let protected = routes::account_router()
        .merge(tenant_scoped)
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
