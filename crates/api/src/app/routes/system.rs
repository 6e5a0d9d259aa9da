use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::context::{Principal, TenantContext};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<TenantContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "user_id": principal.user_id().to_string(),
        "organization_id": ctx.organization_id().to_string(),
        "is_super_admin": ctx.is_super_admin(),
    }))
}
