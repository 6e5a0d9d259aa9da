//! Per-user grants inside an organization: role assignments and direct
//! permission overrides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docket_core::{AssignmentId, DomainError, OrganizationId, OverrideId, PermissionId, RoleId, UserId};

use crate::lifecycle::{Lifecycle, Revocation};

/// A user holding a role within an organization.
///
/// At most one live assignment exists per (user, role, organization).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: AssignmentId,
    pub user_id: UserId,
    pub role_id: RoleId,
    pub organization_id: OrganizationId,
    pub assigned_by: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revocation: Option<Revocation>,
}

impl RoleAssignment {
    pub fn new(
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        assigned_by: Option<UserId>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        ensure_future_expiry(expires_at, now)?;
        Ok(Self {
            id: AssignmentId::new(),
            user_id,
            role_id,
            organization_id,
            assigned_by,
            assigned_at: now,
            expires_at,
            revocation: None,
        })
    }

    pub fn lifecycle(&self, now: DateTime<Utc>) -> Lifecycle {
        Lifecycle::at(self.expires_at, self.revocation.as_ref(), now)
    }

    /// The persisted `is_active` flag: true until revoked or superseded.
    pub fn is_active(&self) -> bool {
        self.revocation.is_none()
    }
}

/// Whether a direct override adds or removes a permission.
///
/// Fixed at creation; switching a grant to a deny is a revoke followed by a
/// new override so both survive in the audit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideEffect {
    Grant,
    Deny,
}

impl OverrideEffect {
    pub fn from_granted(granted: bool) -> Self {
        if granted { Self::Grant } else { Self::Deny }
    }

    pub fn is_grant(self) -> bool {
        self == Self::Grant
    }
}

/// A per-user exception to role-derived access within one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectOverride {
    pub id: OverrideId,
    pub user_id: UserId,
    pub permission_id: PermissionId,
    pub organization_id: OrganizationId,
    pub effect: OverrideEffect,
    pub reason: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revocation: Option<Revocation>,
}

impl DirectOverride {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: UserId,
        permission_id: PermissionId,
        organization_id: OrganizationId,
        effect: OverrideEffect,
        reason: Option<String>,
        created_by: Option<UserId>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        ensure_future_expiry(expires_at, now)?;
        Ok(Self {
            id: OverrideId::new(),
            user_id,
            permission_id,
            organization_id,
            effect,
            reason,
            created_by,
            created_at: now,
            expires_at,
            revocation: None,
        })
    }

    pub fn lifecycle(&self, now: DateTime<Utc>) -> Lifecycle {
        Lifecycle::at(self.expires_at, self.revocation.as_ref(), now)
    }

    pub fn granted(&self) -> bool {
        self.effect.is_grant()
    }
}

fn ensure_future_expiry(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<(), DomainError> {
    match expires_at {
        Some(at) if at <= now => Err(DomainError::validation("expires_at must be in the future")),
        _ => Ok(()),
    }
}

/// Result of a revoke request. Revoking something that is no longer live is
/// a successful no-op so concurrent admins never see spurious failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeOutcome {
    Revoked,
    AlreadyInactive,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn assignment_expiry_must_be_in_the_future() {
        let now = Utc::now();
        let err = RoleAssignment::new(UserId::new(), RoleId::new(), OrganizationId::new(), None, Some(now), now)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn assignment_lifecycle_follows_expiry_and_revocation() {
        let now = Utc::now();
        let mut assignment = RoleAssignment::new(
            UserId::new(),
            RoleId::new(),
            OrganizationId::new(),
            None,
            Some(now + Duration::minutes(5)),
            now,
        )
        .unwrap();
        assert_eq!(assignment.lifecycle(now), Lifecycle::Active);
        assert_eq!(assignment.lifecycle(now + Duration::minutes(5)), Lifecycle::Expired);

        assignment.revocation = Some(Revocation { at: now, by: None });
        assert_eq!(assignment.lifecycle(now), Lifecycle::Revoked);
        assert!(!assignment.is_active());
    }

    #[test]
    fn override_effect_maps_granted_flag() {
        assert_eq!(OverrideEffect::from_granted(true), OverrideEffect::Grant);
        assert_eq!(OverrideEffect::from_granted(false), OverrideEffect::Deny);
    }
}
