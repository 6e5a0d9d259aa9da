use serde::{Deserialize, Serialize};

use docket_core::{OrganizationId, UserId};

/// The organization a request acts on behalf of, plus who is acting.
///
/// Built once per request by the tenant context resolver and passed
/// explicitly into every authorization-dependent call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    organization_id: OrganizationId,
    user_id: UserId,
    is_super_admin: bool,
}

impl TenantContext {
    pub fn new(organization_id: OrganizationId, user_id: UserId, is_super_admin: bool) -> Self {
        Self {
            organization_id,
            user_id,
            is_super_admin,
        }
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn is_super_admin(&self) -> bool {
        self.is_super_admin
    }
}
