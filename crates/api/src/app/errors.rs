use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::json;

use docket_infra::AccessError;

pub fn access_error_to_response(err: AccessError) -> axum::response::Response {
    match err {
        AccessError::Unauthenticated => json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "authentication required"),
        AccessError::NoTenantContext => json_error(
            StatusCode::CONFLICT,
            "no_tenant_context",
            "no organization selected; switch to an organization first",
        ),
        AccessError::PermissionDenied { permission } => json_error(
            StatusCode::FORBIDDEN,
            "permission_denied",
            format!("permission denied: {permission}"),
        ),
        AccessError::NotFound { entity } => json_error(StatusCode::NOT_FOUND, "not_found", format!("{entity} not found")),
        AccessError::NotAMember => json_error(
            StatusCode::FORBIDDEN,
            "not_a_member",
            "not an active member of the target organization",
        ),
        AccessError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        AccessError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        AccessError::AuditWriteFailure(msg) => {
            tracing::error!(error = %msg, "audit write failed; mutation aborted");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
        AccessError::Storage(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

/// `200` with the JSON body, or the mapped error.
pub fn respond<T: Serialize>(result: Result<T, AccessError>) -> axum::response::Response {
    respond_with(StatusCode::OK, result)
}

pub fn respond_with<T: Serialize>(status: StatusCode, result: Result<T, AccessError>) -> axum::response::Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(e) => access_error_to_response(e),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
