use async_trait::async_trait;
use chrono::{DateTime, Utc};

use docket_auth::{
    AuditEntry, DirectOverride, HeldRole, Membership, Organization, OverrideEntry, Permission, Revocation,
    RevokeOutcome, Role, RoleAssignment, RoleGrantedPermission, UserAccount,
};
use docket_core::{AssignmentId, OrganizationId, OverrideId, PermissionId, RoleId, UserId};

use crate::error::StoreError;

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// User accounts: the super-admin flag and the current-organization pointer.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn insert_user(&self, user: UserAccount) -> Result<(), StoreError>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserAccount>, StoreError>;

    /// Set (or clear) the current-organization pointer. Membership is
    /// checked by the caller.
    async fn set_current_organization(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> Result<(), StoreError>;

    /// Toggle the global super-admin flag together with its audit entry.
    async fn set_super_admin(&self, user_id: UserId, is_super_admin: bool, audit: AuditEntry) -> Result<(), StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenant directory
// ─────────────────────────────────────────────────────────────────────────────

/// Organizations and memberships.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn insert_organization(&self, organization: Organization) -> Result<(), StoreError>;

    async fn get_organization(&self, organization_id: OrganizationId) -> Result<Option<Organization>, StoreError>;

    /// Every organization, for super-admin management views only.
    async fn list_all_organizations(&self) -> Result<Vec<Organization>, StoreError>;

    async fn get_membership(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<Membership>, StoreError>;

    /// All memberships of one user, active or not.
    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<Membership>, StoreError>;

    /// Active members of one organization.
    async fn list_members(&self, organization_id: OrganizationId) -> Result<Vec<Membership>, StoreError>;

    /// Insert or reactivate. A primary membership clears the user's other
    /// primary flags.
    async fn upsert_membership(&self, membership: Membership) -> Result<(), StoreError>;

    /// Deactivate, clearing the user's current-organization pointer when it
    /// referenced this organization. Returns `false` if there was no active
    /// membership.
    async fn deactivate_membership(&self, user_id: UserId, organization_id: OrganizationId)
    -> Result<bool, StoreError>;

    /// Make an existing active membership the user's only primary one.
    async fn set_primary_membership(&self, user_id: UserId, organization_id: OrganizationId)
    -> Result<(), StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission catalog
// ─────────────────────────────────────────────────────────────────────────────

/// The global permission catalog. Not organization-scoped.
#[async_trait]
pub trait PermissionCatalog: Send + Sync {
    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError>;

    async fn get_permission_by_slug(&self, slug: &str) -> Result<Option<Permission>, StoreError>;

    /// Insert the permissions whose slugs are not yet present; returns how
    /// many were added.
    async fn seed_permissions(&self, permissions: Vec<Permission>) -> Result<usize, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles and assignments
// ─────────────────────────────────────────────────────────────────────────────

/// Organization-scoped roles, their permission mappings and role
/// assignments. Every read is bounded by the organization argument.
///
/// Mutations take the audit entry describing them and persist both or
/// neither.
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get_role(&self, organization_id: OrganizationId, role_id: RoleId) -> Result<Option<Role>, StoreError>;

    async fn get_role_by_slug(&self, organization_id: OrganizationId, slug: &str) -> Result<Option<Role>, StoreError>;

    /// Active roles of the organization.
    async fn list_roles(&self, organization_id: OrganizationId) -> Result<Vec<Role>, StoreError>;

    /// Permission slugs attached to the given roles of the organization.
    async fn role_permissions(
        &self,
        organization_id: OrganizationId,
        role_ids: &[RoleId],
    ) -> Result<Vec<RoleGrantedPermission>, StoreError>;

    async fn create_role(&self, role: Role, permissions: Vec<PermissionId>, audit: AuditEntry) -> Result<(), StoreError>;

    async fn update_role(&self, role: Role, audit: AuditEntry) -> Result<(), StoreError>;

    async fn replace_role_permissions(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
        permissions: Vec<PermissionId>,
        audit: AuditEntry,
    ) -> Result<(), StoreError>;

    /// Soft delete. Fails with `Conflict` if live assignments still point at
    /// the role.
    async fn deactivate_role(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
        now: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<(), StoreError>;

    /// Assignments of `user_id` in the organization that are live at `now`,
    /// joined with active roles.
    async fn held_roles(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<HeldRole>, StoreError>;

    async fn get_assignment(
        &self,
        organization_id: OrganizationId,
        assignment_id: AssignmentId,
    ) -> Result<Option<RoleAssignment>, StoreError>;

    /// Assignments of the organization (optionally one user's), newest first.
    async fn list_assignments(
        &self,
        organization_id: OrganizationId,
        user_id: Option<UserId>,
    ) -> Result<Vec<RoleAssignment>, StoreError>;

    /// Insert a new assignment. A live row for the same (user, role,
    /// organization) is a `Conflict`; an active-but-expired one is
    /// superseded in the same unit.
    async fn insert_assignment(
        &self,
        assignment: RoleAssignment,
        now: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<(), StoreError>;

    /// Revoke if still live at `revocation.at`. The audit entry is written
    /// only for an effective revoke.
    async fn revoke_assignment(
        &self,
        organization_id: OrganizationId,
        assignment_id: AssignmentId,
        revocation: Revocation,
        audit: AuditEntry,
    ) -> Result<RevokeOutcome, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Direct overrides
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Overrides of `user_id` in the organization live at `now`, joined with
    /// their permission slugs.
    async fn live_overrides(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<OverrideEntry>, StoreError>;

    async fn get_override(
        &self,
        organization_id: OrganizationId,
        override_id: OverrideId,
    ) -> Result<Option<DirectOverride>, StoreError>;

    /// Overrides of the organization (optionally one user's), newest first.
    async fn list_overrides(
        &self,
        organization_id: OrganizationId,
        user_id: Option<UserId>,
    ) -> Result<Vec<OverrideEntry>, StoreError>;

    async fn insert_override(&self, entry: DirectOverride, audit: AuditEntry) -> Result<(), StoreError>;

    /// Same contract as [`RoleStore::revoke_assignment`].
    async fn revoke_override(
        &self,
        organization_id: OrganizationId,
        override_id: OverrideId,
        revocation: Revocation,
        audit: AuditEntry,
    ) -> Result<RevokeOutcome, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit log
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only audit trail. There is no update or delete.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append a standalone entry.
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// Newest first. `None` lists global entries (organization-less, e.g.
    /// super-admin elevation).
    async fn list_audit(
        &self,
        organization_id: Option<OrganizationId>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Everything the authorization services need from storage.
pub trait AuthzStore: IdentityStore + TenantDirectory + PermissionCatalog + RoleStore + OverrideStore + AuditLog {}

impl<T> AuthzStore for T where T: IdentityStore + TenantDirectory + PermissionCatalog + RoleStore + OverrideStore + AuditLog
{}
