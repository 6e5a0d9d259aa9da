//! Audit trail records for authorization-relevant changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docket_core::{AuditEntryId, OrganizationId, UserId};

/// Authorization-relevant state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    RoleCreated,
    RoleUpdated,
    RolePermissionsChanged,
    RoleDeleted,
    RoleAssigned,
    RoleRevoked,
    PermissionGranted,
    PermissionDenied,
    OverrideRevoked,
    SuperAdminGranted,
    SuperAdminRevoked,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::RoleCreated => "rbac.role.created",
            AuditAction::RoleUpdated => "rbac.role.updated",
            AuditAction::RolePermissionsChanged => "rbac.role.permissions_changed",
            AuditAction::RoleDeleted => "rbac.role.deleted",
            AuditAction::RoleAssigned => "rbac.role.assigned",
            AuditAction::RoleRevoked => "rbac.role.revoked",
            AuditAction::PermissionGranted => "rbac.permission.granted",
            AuditAction::PermissionDenied => "rbac.permission.denied",
            AuditAction::OverrideRevoked => "rbac.permission.override_revoked",
            AuditAction::SuperAdminGranted => "identity.super_admin.granted",
            AuditAction::SuperAdminRevoked => "identity.super_admin.revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ALL_ACTIONS.iter().copied().find(|a| a.as_str() == s)
    }
}

const ALL_ACTIONS: [AuditAction; 11] = [
    AuditAction::RoleCreated,
    AuditAction::RoleUpdated,
    AuditAction::RolePermissionsChanged,
    AuditAction::RoleDeleted,
    AuditAction::RoleAssigned,
    AuditAction::RoleRevoked,
    AuditAction::PermissionGranted,
    AuditAction::PermissionDenied,
    AuditAction::OverrideRevoked,
    AuditAction::SuperAdminGranted,
    AuditAction::SuperAdminRevoked,
];

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of record an audit entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    Role,
    RoleAssignment,
    DirectOverride,
    User,
}

impl AuditEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntity::Role => "role",
            AuditEntity::RoleAssignment => "role_assignment",
            AuditEntity::DirectOverride => "direct_override",
            AuditEntity::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "role" => Some(AuditEntity::Role),
            "role_assignment" => Some(AuditEntity::RoleAssignment),
            "direct_override" => Some(AuditEntity::DirectOverride),
            "user" => Some(AuditEntity::User),
            _ => None,
        }
    }
}

/// Immutable, append-only audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    /// `None` for global changes such as super-admin elevation.
    pub organization_id: Option<OrganizationId>,
    pub actor: Option<UserId>,
    pub action: AuditAction,
    pub entity_type: AuditEntity,
    pub entity_id: String,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: Option<UserId>,
        action: AuditAction,
        entity_type: AuditEntity,
        entity_id: impl ToString,
        description: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            organization_id: None,
            actor,
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            description: description.into(),
            metadata: None,
            recorded_at,
        }
    }

    pub fn in_organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_round_trip() {
        for action in ALL_ACTIONS {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("rbac.unknown"), None);
    }

    #[test]
    fn builder_scopes_entry() {
        let org = OrganizationId::new();
        let entry = AuditEntry::new(
            Some(UserId::new()),
            AuditAction::RoleAssigned,
            AuditEntity::RoleAssignment,
            "a1",
            "assigned clerk",
            Utc::now(),
        )
        .in_organization(org)
        .with_metadata(serde_json::json!({ "role": "clerk" }));

        assert_eq!(entry.organization_id, Some(org));
        assert_eq!(entry.metadata.unwrap()["role"], "clerk");
    }
}
