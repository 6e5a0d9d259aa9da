use axum::{
    routing::{get, post},
    Router,
};

pub mod admin;
pub mod organizations;
pub mod rbac;
pub mod system;

/// Authenticated endpoints that must work before an organization is chosen.
pub fn account_router() -> Router {
    Router::new()
        .route("/organizations", get(organizations::list_mine))
        .route("/organizations/switch", post(organizations::switch))
}

/// Authenticated, organization-scoped endpoints.
pub fn tenant_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/organizations/current/members", get(organizations::list_members))
        .nest("/rbac", rbac::router())
        .nest("/admin", admin::router())
}
