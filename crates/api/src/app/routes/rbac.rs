//! Organization-scoped RBAC routes: effective permissions, roles, role
//! assignments, direct overrides and the audit trail.
//!
//! Handlers stay thin: gating, tenant scoping and auditing happen in
//! [`RbacAdmin`](docket_infra::RbacAdmin).

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use uuid::Uuid;

use docket_auth::RoleChanges;
use docket_core::{AssignmentId, OverrideId, RoleId};
use docket_infra::services::{NewRole, OverrideRequest};

use crate::app::dto::{
    AssignRoleRequest, AuditQuery, EffectivePermissionsResponse, ExplainQuery, OverrideView, RevokeResponse,
    SetRolePermissionsRequest, UserFilter,
};
use crate::app::{errors, services::AppServices};
use crate::context::TenantContext;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/me/permissions", get(my_permissions))
        .route("/me/explain", get(explain))
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:id", get(get_role).patch(update_role).delete(delete_role))
        .route("/roles/:id/permissions", put(set_role_permissions))
        .route("/assignments", get(list_assignments).post(assign_role))
        .route("/assignments/:id", delete(revoke_assignment))
        .route("/overrides", get(list_overrides).post(create_override))
        .route("/overrides/:id", delete(revoke_override))
        .route("/audit", get(list_audit))
}

// ─────────────────────────────────────────────────────────────────────────────
// Effective permissions
// ─────────────────────────────────────────────────────────────────────────────

/// GET /rbac/me/permissions - the caller's effective set in the current organization
pub async fn my_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
) -> Response {
    let result = services
        .gate
        .effective(&ctx)
        .await
        .map(|set| EffectivePermissionsResponse::new(ctx.organization_id(), &set));
    errors::respond(result)
}

/// GET /rbac/me/explain?permission=cases:update
pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Query(q): Query<ExplainQuery>,
) -> Response {
    errors::respond(services.gate.explain(&ctx, &q.permission).await)
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

/// GET /rbac/roles
pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
) -> Response {
    errors::respond(services.admin.list_roles(&ctx).await)
}

/// POST /rbac/roles
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Json(body): Json<NewRole>,
) -> Response {
    errors::respond_with(StatusCode::CREATED, services.admin.create_role(&ctx, body).await)
}

/// GET /rbac/roles/:id - role with its permissions
pub async fn get_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Response {
    errors::respond(services.admin.get_role(&ctx, RoleId::from(id)).await)
}

/// PATCH /rbac/roles/:id - rename or re-describe a custom role
pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<RoleChanges>,
) -> Response {
    errors::respond(services.admin.update_role(&ctx, RoleId::from(id), body).await)
}

/// DELETE /rbac/roles/:id
pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Response {
    match services.admin.delete_role(&ctx, RoleId::from(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// PUT /rbac/roles/:id/permissions - replace the permission mapping
pub async fn set_role_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetRolePermissionsRequest>,
) -> Response {
    let role_id = RoleId::from(id);
    let result = match services
        .admin
        .set_role_permissions(&ctx, role_id, &body.permissions)
        .await
    {
        Ok(()) => services.admin.get_role(&ctx, role_id).await,
        Err(e) => Err(e),
    };
    errors::respond(result)
}

// ─────────────────────────────────────────────────────────────────────────────
// Assignments
// ─────────────────────────────────────────────────────────────────────────────

/// GET /rbac/assignments?user_id=...
pub async fn list_assignments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Query(filter): Query<UserFilter>,
) -> Response {
    errors::respond(services.admin.list_assignments(&ctx, filter.user_id).await)
}

/// POST /rbac/assignments
pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Json(body): Json<AssignRoleRequest>,
) -> Response {
    errors::respond_with(
        StatusCode::CREATED,
        services
            .admin
            .assign_role(&ctx, body.user_id, body.role_id, body.expires_at)
            .await,
    )
}

/// DELETE /rbac/assignments/:id - idempotent
pub async fn revoke_assignment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Response {
    let result = services.admin.revoke_role(&ctx, AssignmentId::from(id)).await;
    errors::respond(result.map(|outcome| RevokeResponse { outcome }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Direct overrides
// ─────────────────────────────────────────────────────────────────────────────

/// GET /rbac/overrides?user_id=...
pub async fn list_overrides(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Query(filter): Query<UserFilter>,
) -> Response {
    let result = services.admin.list_overrides(&ctx, filter.user_id).await;
    errors::respond(result.map(|entries| entries.into_iter().map(OverrideView::from).collect::<Vec<_>>()))
}

/// POST /rbac/overrides - direct grant or deny
pub async fn create_override(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Json(body): Json<OverrideRequest>,
) -> Response {
    errors::respond_with(StatusCode::CREATED, services.admin.create_override(&ctx, body).await)
}

/// DELETE /rbac/overrides/:id - idempotent
pub async fn revoke_override(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Response {
    let result = services.admin.revoke_override(&ctx, OverrideId::from(id)).await;
    errors::respond(result.map(|outcome| RevokeResponse { outcome }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit
// ─────────────────────────────────────────────────────────────────────────────

/// GET /rbac/audit?limit=50 - newest first
pub async fn list_audit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
    Query(q): Query<AuditQuery>,
) -> Response {
    errors::respond(services.admin.list_audit(&ctx, q.limit()).await)
}
