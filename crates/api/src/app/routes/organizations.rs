//! Organization selection and membership listing.

use std::sync::Arc;

use axum::{extract::Extension, response::Response, Json};

use docket_auth::catalog::MEMBERS_READ;
use docket_infra::{AccessError, Switch};

use crate::app::dto::SwitchOrganizationRequest;
use crate::app::{errors, services::AppServices};
use crate::context::{Principal, TenantContext};

/// GET /organizations - organizations the caller actively belongs to
pub async fn list_mine(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
) -> Response {
    errors::respond(services.tenancy.organizations_of(principal.user_id()).await)
}

/// POST /organizations/switch - change the caller's current organization
pub async fn switch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<SwitchOrganizationRequest>,
) -> Response {
    match services
        .tenancy
        .switch_organization(principal.user_id(), body.organization_id)
        .await
    {
        Ok(Switch::Switched) => errors::respond(Ok(serde_json::json!({
            "organization_id": body.organization_id,
        }))),
        Ok(Switch::NotAMember) => errors::access_error_to_response(AccessError::NotAMember),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// GET /organizations/current/members
pub async fn list_members(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<TenantContext>,
) -> Response {
    if let Err(e) = services.gate.require(&ctx, MEMBERS_READ.as_str()).await {
        return errors::access_error_to_response(e);
    }
    errors::respond(services.tenancy.list_members(&ctx).await)
}
