//! Column views of the organization-scoped domain rows.

use docket_auth::{AuditEntry, DirectOverride, Membership, Role, RoleAssignment};
use docket_core::OrganizationId;

use super::{Columns, ORGANIZATION_COLUMN, OrgScoped, ScopeValue};

macro_rules! org_scoped {
    ($($ty:ty),+ $(,)?) => {
        $(impl OrgScoped for $ty {
            fn organization_id(&self) -> OrganizationId {
                self.organization_id
            }

            fn set_organization_id(&mut self, organization_id: OrganizationId) {
                self.organization_id = organization_id;
            }
        })+
    };
}

org_scoped!(Role, RoleAssignment, DirectOverride, Membership);

impl Columns for Role {
    fn column(&self, name: &str) -> Option<ScopeValue> {
        Some(match name {
            "id" => self.id.into(),
            ORGANIZATION_COLUMN => self.organization_id.into(),
            "slug" => self.slug.as_str().into(),
            "is_system" => self.is_system.into(),
            "is_active" => self.is_active.into(),
            _ => return None,
        })
    }
}

impl Columns for RoleAssignment {
    fn column(&self, name: &str) -> Option<ScopeValue> {
        Some(match name {
            "id" => self.id.into(),
            ORGANIZATION_COLUMN => self.organization_id.into(),
            "user_id" => self.user_id.into(),
            "role_id" => self.role_id.into(),
            "is_active" => self.is_active().into(),
            "expires_at" => self.expires_at.into(),
            _ => return None,
        })
    }
}

impl Columns for DirectOverride {
    fn column(&self, name: &str) -> Option<ScopeValue> {
        Some(match name {
            "id" => self.id.into(),
            ORGANIZATION_COLUMN => self.organization_id.into(),
            "user_id" => self.user_id.into(),
            "permission_id" => self.permission_id.into(),
            "granted" => self.granted().into(),
            "is_active" => self.revocation.is_none().into(),
            "expires_at" => self.expires_at.into(),
            _ => return None,
        })
    }
}

impl Columns for Membership {
    fn column(&self, name: &str) -> Option<ScopeValue> {
        Some(match name {
            ORGANIZATION_COLUMN => self.organization_id.into(),
            "user_id" => self.user_id.into(),
            "is_active" => self.is_active.into(),
            "is_primary" => self.is_primary.into(),
            _ => return None,
        })
    }
}

impl Columns for AuditEntry {
    fn column(&self, name: &str) -> Option<ScopeValue> {
        Some(match name {
            "id" => self.id.into(),
            ORGANIZATION_COLUMN => self.organization_id.into(),
            "actor_id" => self.actor.into(),
            "action" => self.action.as_str().into(),
            "entity_type" => self.entity_type.as_str().into(),
            "recorded_at" => self.recorded_at.into(),
            _ => return None,
        })
    }
}
