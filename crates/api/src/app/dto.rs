use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docket_auth::{EffectivePermissionSet, OverrideEntry, RevokeOutcome};
use docket_core::{OrganizationId, RoleId, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Request DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SetRolePermissionsRequest {
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchOrganizationRequest {
    pub organization_id: OrganizationId,
}

#[derive(Debug, Deserialize)]
pub struct SuperAdminRequest {
    pub is_super_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserFilter {
    pub user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub permission: String,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 500;

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).min(Self::MAX_LIMIT)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct EffectivePermissionsResponse {
    pub organization_id: OrganizationId,
    pub is_super_admin: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl EffectivePermissionsResponse {
    pub fn new(organization_id: OrganizationId, set: &EffectivePermissionSet) -> Self {
        Self {
            organization_id,
            is_super_admin: set.is_super_admin(),
            roles: set.role_slugs().iter().cloned().collect(),
            permissions: set.permission_slugs().iter().map(|p| p.as_str().to_string()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OverrideView {
    #[serde(flatten)]
    pub entry: docket_auth::DirectOverride,
    pub permission: String,
}

impl From<OverrideEntry> for OverrideView {
    fn from(o: OverrideEntry) -> Self {
        Self {
            entry: o.entry,
            permission: o.permission.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub outcome: RevokeOutcome,
}
