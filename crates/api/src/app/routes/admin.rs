//! Super-admin management routes.
//!
//! The only cross-tenant surface of the API. Every handler checks the
//! caller's global super-admin flag.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use docket_core::{OrganizationId, UserId};
use docket_infra::AccessError;

use crate::app::dto::{AuditQuery, SuperAdminRequest};
use crate::app::{errors, services::AppServices};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/organizations", get(list_organizations))
        .route("/organizations/:id/seed", post(seed_organization))
        .route("/users/:id/super-admin", put(set_super_admin))
        .route("/audit", get(list_global_audit))
}

/// GET /admin/organizations - every organization
pub async fn list_organizations(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
) -> Response {
    errors::respond(services.tenancy.list_all_organizations(&ctx).await)
}

/// POST /admin/organizations/:id/seed - install the system roles
pub async fn seed_organization(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Response {
    if !ctx.is_super_admin() {
        return errors::access_error_to_response(AccessError::denied("super-admin"));
    }
    errors::respond(services.admin.seed_organization(OrganizationId::from(id)).await)
}

/// PUT /admin/users/:id/super-admin - elevate or demote
pub async fn set_super_admin(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<SuperAdminRequest>,
) -> Response {
    match services
        .admin
        .set_super_admin(&ctx, UserId::from(id), body.is_super_admin)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// GET /admin/audit - organization-less audit entries
pub async fn list_global_audit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Query(q): Query<AuditQuery>,
) -> Response {
    errors::respond(services.admin.list_global_audit(&ctx, q.limit()).await)
}
