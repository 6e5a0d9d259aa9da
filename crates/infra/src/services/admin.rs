//! Audited RBAC administration.
//!
//! Every mutation follows the same shape: gate on the operation's permission,
//! fetch and re-validate the target inside the caller's organization, apply
//! domain rules, then hand the row change and its audit entry to the store as
//! one unit.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use docket_auth::catalog::{AUDIT_READ, PERMISSIONS_GRANT, ROLES_ASSIGN, ROLES_CREATE, ROLES_DELETE, ROLES_READ, ROLES_UPDATE};
use docket_auth::{
    AuditAction, AuditEntity, AuditEntry, DirectOverride, EffectivePermissionSet, OverrideEffect, OverrideEntry, Permission, PermissionSlug,
    Revocation, RevokeOutcome, Role, RoleAssignment, RoleChanges, TenantContext, default_catalog,
    system_role_templates,
};
use docket_core::{AssignmentId, OrganizationId, OverrideId, PermissionId, RoleId, UserId};

use crate::error::AccessError;
use crate::scope::validate_org_access;
use crate::services::AccessGate;
use crate::store::AuthzStore;

/// Input for a custom role.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Input for a direct grant or deny.
#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRequest {
    pub user_id: UserId,
    pub permission: String,
    pub effect: OverrideEffect,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A role together with the permissions mapped to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDetails {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<PermissionSlug>,
}

pub struct RbacAdmin<S: ?Sized> {
    store: Arc<S>,
    gate: AccessGate<S>,
}

impl<S: ?Sized> Clone for RbacAdmin<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            gate: self.gate.clone(),
        }
    }
}

impl<S: AuthzStore + ?Sized> RbacAdmin<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            gate: AccessGate::new(Arc::clone(&store)),
            store,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Seeding
    // ─────────────────────────────────────────────────────────────────────

    /// Insert the default permission catalog; returns how many were new.
    pub async fn seed_catalog(&self) -> Result<usize, AccessError> {
        let now = Utc::now();
        let permissions = default_catalog()
            .into_iter()
            .map(|(slug, description)| Permission::new(slug, Some(description.to_string()), now))
            .collect();
        let added = self.store.seed_permissions(permissions).await?;
        if added > 0 {
            info!(added, "permission catalog seeded");
        }
        Ok(added)
    }

    /// Install the system roles into an organization. Roles that already
    /// exist are left untouched, so this is safe to run repeatedly.
    #[instrument(skip(self), fields(organization_id = %organization_id), err)]
    pub async fn seed_organization(&self, organization_id: OrganizationId) -> Result<Vec<Role>, AccessError> {
        if self.store.get_organization(organization_id).await?.is_none() {
            return Err(AccessError::not_found("organization"));
        }
        let now = Utc::now();
        let mut created = Vec::new();

        for template in system_role_templates() {
            if self.store.get_role_by_slug(organization_id, template.slug).await?.is_some() {
                continue;
            }
            let slugs: Vec<&str> = template.permissions.iter().map(PermissionSlug::as_str).collect();
            let permissions = self.permission_ids(&slugs).await?;
            let role = Role::new(
                organization_id,
                template.slug,
                template.name,
                Some(template.description.to_string()),
                true,
                now,
            )?;
            let audit = AuditEntry::new(
                None,
                AuditAction::RoleCreated,
                AuditEntity::Role,
                role.id,
                format!("Seeded system role '{}'", role.slug),
                now,
            )
            .in_organization(organization_id)
            .with_metadata(json!({ "permissions": slugs }));

            self.store
                .create_role(role.clone(), permissions.into_values().collect(), audit)
                .await?;
            created.push(role);
        }

        info!(created = created.len(), "system roles seeded");
        Ok(created)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────

    pub async fn list_roles(&self, ctx: &TenantContext) -> Result<Vec<Role>, AccessError> {
        self.gate.require(ctx, ROLES_READ.as_str()).await?;
        Ok(self.store.list_roles(ctx.organization_id()).await?)
    }

    pub async fn get_role(&self, ctx: &TenantContext, role_id: RoleId) -> Result<RoleDetails, AccessError> {
        self.gate.require(ctx, ROLES_READ.as_str()).await?;
        let role = self.fetch_role(ctx.organization_id(), role_id).await?;
        let permissions = self
            .store
            .role_permissions(ctx.organization_id(), &[role.id])
            .await?
            .into_iter()
            .map(|p| p.permission)
            .collect();
        Ok(RoleDetails { role, permissions })
    }

    #[instrument(skip(self, ctx, input), fields(organization_id = %ctx.organization_id(), slug = %input.slug), err)]
    pub async fn create_role(&self, ctx: &TenantContext, input: NewRole) -> Result<Role, AccessError> {
        let actor = self.gate.require(ctx, ROLES_CREATE.as_str()).await?;
        let now = Utc::now();
        let organization_id = ctx.organization_id();

        let role = Role::new(organization_id, input.slug, input.name, input.description, false, now)?;
        if self.store.get_role_by_slug(organization_id, &role.slug).await?.is_some() {
            return Err(AccessError::Conflict(format!("role '{}' already exists", role.slug)));
        }
        let permissions = self.permission_ids(&input.permissions).await?;
        ensure_held(&actor, &input.permissions)?;

        let audit = AuditEntry::new(
            Some(ctx.user_id()),
            AuditAction::RoleCreated,
            AuditEntity::Role,
            role.id,
            format!("Created role '{}'", role.slug),
            now,
        )
        .in_organization(organization_id)
        .with_metadata(json!({ "permissions": permissions.keys().collect::<Vec<_>>() }));

        self.store
            .create_role(role.clone(), permissions.into_values().collect(), audit)
            .await?;
        info!(role_id = %role.id, "role created");
        Ok(role)
    }

    #[instrument(skip(self, ctx, changes), fields(organization_id = %ctx.organization_id()), err)]
    pub async fn update_role(&self, ctx: &TenantContext, role_id: RoleId, changes: RoleChanges) -> Result<Role, AccessError> {
        self.gate.require(ctx, ROLES_UPDATE.as_str()).await?;
        let now = Utc::now();
        let mut role = self.fetch_role(ctx.organization_id(), role_id).await?;
        changes.apply(&mut role, now)?;

        let audit = AuditEntry::new(
            Some(ctx.user_id()),
            AuditAction::RoleUpdated,
            AuditEntity::Role,
            role.id,
            format!("Updated role '{}'", role.slug),
            now,
        )
        .in_organization(ctx.organization_id());

        self.store.update_role(role.clone(), audit).await?;
        info!("role updated");
        Ok(role)
    }

    /// Replace the role's permission mapping wholesale. Outside super admins,
    /// every permission put on the role must be held by the caller.
    #[instrument(skip(self, ctx, permissions), fields(organization_id = %ctx.organization_id()), err)]
    pub async fn set_role_permissions<P: AsRef<str> + Sync>(
        &self,
        ctx: &TenantContext,
        role_id: RoleId,
        permissions: &[P],
    ) -> Result<(), AccessError> {
        let actor = self.gate.require(ctx, ROLES_UPDATE.as_str()).await?;
        let now = Utc::now();
        let role = self.fetch_role(ctx.organization_id(), role_id).await?;
        role.ensure_mutable()?;
        let requested = permissions;
        let permissions = self.permission_ids(requested).await?;
        ensure_held(&actor, requested)?;

        let audit = AuditEntry::new(
            Some(ctx.user_id()),
            AuditAction::RolePermissionsChanged,
            AuditEntity::Role,
            role.id,
            format!("Changed permissions of role '{}'", role.slug),
            now,
        )
        .in_organization(ctx.organization_id())
        .with_metadata(json!({ "permissions": permissions.keys().collect::<Vec<_>>() }));

        self.store
            .replace_role_permissions(ctx.organization_id(), role.id, permissions.into_values().collect(), audit)
            .await?;
        info!("role permissions replaced");
        Ok(())
    }

    /// Soft delete. Refused for system roles and for roles still held by
    /// someone.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id()), err)]
    pub async fn delete_role(&self, ctx: &TenantContext, role_id: RoleId) -> Result<(), AccessError> {
        self.gate.require(ctx, ROLES_DELETE.as_str()).await?;
        let now = Utc::now();
        let role = self.fetch_role(ctx.organization_id(), role_id).await?;
        role.ensure_mutable()?;

        let audit = AuditEntry::new(
            Some(ctx.user_id()),
            AuditAction::RoleDeleted,
            AuditEntity::Role,
            role.id,
            format!("Deleted role '{}'", role.slug),
            now,
        )
        .in_organization(ctx.organization_id());

        self.store
            .deactivate_role(ctx.organization_id(), role.id, now, audit)
            .await?;
        info!("role deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Assignments
    // ─────────────────────────────────────────────────────────────────────

    pub async fn list_assignments(
        &self,
        ctx: &TenantContext,
        user_id: Option<UserId>,
    ) -> Result<Vec<RoleAssignment>, AccessError> {
        self.gate.require(ctx, ROLES_READ.as_str()).await?;
        Ok(self.store.list_assignments(ctx.organization_id(), user_id).await?)
    }

    /// Give `user_id` the role inside the caller's organization.
    ///
    /// The assignee must be an active member, and unless the caller is a
    /// super admin every permission of the role must already be in the
    /// caller's own effective set.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id()), err)]
    pub async fn assign_role(
        &self,
        ctx: &TenantContext,
        user_id: UserId,
        role_id: RoleId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RoleAssignment, AccessError> {
        let actor = self.gate.require(ctx, ROLES_ASSIGN.as_str()).await?;
        let now = Utc::now();
        let organization_id = ctx.organization_id();
        let role = self.fetch_role(organization_id, role_id).await?;
        self.ensure_member(user_id, organization_id).await?;

        if !actor.is_super_admin() {
            let granted = self.store.role_permissions(organization_id, &[role.id]).await?;
            if let Some(missing) = granted.iter().find(|p| !actor.has_permission(p.permission.as_str())) {
                return Err(AccessError::denied(missing.permission.as_str()));
            }
        }

        let assignment = RoleAssignment::new(user_id, role.id, organization_id, Some(ctx.user_id()), expires_at, now)?;
        let audit = AuditEntry::new(
            Some(ctx.user_id()),
            AuditAction::RoleAssigned,
            AuditEntity::RoleAssignment,
            assignment.id,
            format!("Assigned role '{}' to user {user_id}", role.slug),
            now,
        )
        .in_organization(organization_id)
        .with_metadata(json!({
            "user_id": user_id,
            "role_id": role.id,
            "expires_at": expires_at,
        }));

        self.store.insert_assignment(assignment.clone(), now, audit).await?;
        info!(assignment_id = %assignment.id, %user_id, role = %role.slug, "role assigned");
        Ok(assignment)
    }

    /// Revoking an assignment that already ended is a successful no-op.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id()), err)]
    pub async fn revoke_role(&self, ctx: &TenantContext, assignment_id: AssignmentId) -> Result<RevokeOutcome, AccessError> {
        self.gate.require(ctx, ROLES_ASSIGN.as_str()).await?;
        let now = Utc::now();
        let organization_id = ctx.organization_id();
        let assignment = validate_org_access(
            organization_id,
            self.store.get_assignment(organization_id, assignment_id).await?,
            "role assignment",
        )?;

        let audit = AuditEntry::new(
            Some(ctx.user_id()),
            AuditAction::RoleRevoked,
            AuditEntity::RoleAssignment,
            assignment.id,
            format!("Revoked role assignment of user {}", assignment.user_id),
            now,
        )
        .in_organization(organization_id)
        .with_metadata(json!({ "user_id": assignment.user_id, "role_id": assignment.role_id }));

        let revocation = Revocation {
            at: now,
            by: Some(ctx.user_id()),
        };
        let outcome = self
            .store
            .revoke_assignment(organization_id, assignment.id, revocation, audit)
            .await?;
        info!(%assignment_id, ?outcome, "role assignment revoke");
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Direct overrides
    // ─────────────────────────────────────────────────────────────────────

    pub async fn list_overrides(
        &self,
        ctx: &TenantContext,
        user_id: Option<UserId>,
    ) -> Result<Vec<OverrideEntry>, AccessError> {
        self.gate.require(ctx, PERMISSIONS_GRANT.as_str()).await?;
        Ok(self.store.list_overrides(ctx.organization_id(), user_id).await?)
    }

    pub async fn grant_permission(
        &self,
        ctx: &TenantContext,
        user_id: UserId,
        permission: &str,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<DirectOverride, AccessError> {
        self.create_override(
            ctx,
            OverrideRequest {
                user_id,
                permission: permission.to_string(),
                effect: OverrideEffect::Grant,
                reason,
                expires_at,
            },
        )
        .await
    }

    pub async fn deny_permission(
        &self,
        ctx: &TenantContext,
        user_id: UserId,
        permission: &str,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<DirectOverride, AccessError> {
        self.create_override(
            ctx,
            OverrideRequest {
                user_id,
                permission: permission.to_string(),
                effect: OverrideEffect::Deny,
                reason,
                expires_at,
            },
        )
        .await
    }

    /// Record a direct grant or deny. A grant is only allowed for a
    /// permission the caller holds; a deny needs nothing beyond
    /// `permissions:grant`.
    #[instrument(
        skip(self, ctx, request),
        fields(organization_id = %ctx.organization_id(), permission = %request.permission, effect = ?request.effect),
        err
    )]
    pub async fn create_override(&self, ctx: &TenantContext, request: OverrideRequest) -> Result<DirectOverride, AccessError> {
        let actor = self.gate.require(ctx, PERMISSIONS_GRANT.as_str()).await?;
        let now = Utc::now();
        let organization_id = ctx.organization_id();

        if request.effect.is_grant() && !actor.has_permission(&request.permission) {
            return Err(AccessError::denied(request.permission));
        }
        let permission = self
            .store
            .get_permission_by_slug(&request.permission)
            .await?
            .ok_or_else(|| AccessError::Validation(format!("unknown permission '{}'", request.permission)))?;
        self.ensure_member(request.user_id, organization_id).await?;

        let entry = DirectOverride::new(
            request.user_id,
            permission.id,
            organization_id,
            request.effect,
            request.reason.clone(),
            Some(ctx.user_id()),
            request.expires_at,
            now,
        )?;
        let (action, verb) = match request.effect {
            OverrideEffect::Grant => (AuditAction::PermissionGranted, "Granted"),
            OverrideEffect::Deny => (AuditAction::PermissionDenied, "Denied"),
        };
        let audit = AuditEntry::new(
            Some(ctx.user_id()),
            action,
            AuditEntity::DirectOverride,
            entry.id,
            format!("{verb} '{}' for user {}", permission.slug, request.user_id),
            now,
        )
        .in_organization(organization_id)
        .with_metadata(json!({
            "user_id": request.user_id,
            "permission": permission.slug,
            "reason": request.reason,
            "expires_at": request.expires_at,
        }));

        self.store.insert_override(entry.clone(), audit).await?;
        info!(override_id = %entry.id, user_id = %request.user_id, "direct override created");
        Ok(entry)
    }

    /// Same no-op contract as [`revoke_role`](Self::revoke_role).
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id()), err)]
    pub async fn revoke_override(&self, ctx: &TenantContext, override_id: OverrideId) -> Result<RevokeOutcome, AccessError> {
        self.gate.require(ctx, PERMISSIONS_GRANT.as_str()).await?;
        let now = Utc::now();
        let organization_id = ctx.organization_id();
        let entry = validate_org_access(
            organization_id,
            self.store.get_override(organization_id, override_id).await?,
            "direct override",
        )?;

        let audit = AuditEntry::new(
            Some(ctx.user_id()),
            AuditAction::OverrideRevoked,
            AuditEntity::DirectOverride,
            entry.id,
            format!("Revoked direct override of user {}", entry.user_id),
            now,
        )
        .in_organization(organization_id)
        .with_metadata(json!({ "user_id": entry.user_id, "granted": entry.granted() }));

        let revocation = Revocation {
            at: now,
            by: Some(ctx.user_id()),
        };
        let outcome = self
            .store
            .revoke_override(organization_id, entry.id, revocation, audit)
            .await?;
        info!(%override_id, ?outcome, "direct override revoke");
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Super admin and audit
    // ─────────────────────────────────────────────────────────────────────

    /// Elevate or demote a user globally. Only super admins may do this.
    #[instrument(skip(self, ctx), fields(actor = %ctx.user_id()), err)]
    pub async fn set_super_admin(&self, ctx: &TenantContext, user_id: UserId, is_super_admin: bool) -> Result<(), AccessError> {
        if !ctx.is_super_admin() {
            return Err(AccessError::denied("super-admin"));
        }
        let now = Utc::now();
        let (action, description) = if is_super_admin {
            (AuditAction::SuperAdminGranted, format!("Elevated user {user_id} to super admin"))
        } else {
            (AuditAction::SuperAdminRevoked, format!("Revoked super admin from user {user_id}"))
        };
        let audit = AuditEntry::new(Some(ctx.user_id()), action, AuditEntity::User, user_id, description, now);

        self.store.set_super_admin(user_id, is_super_admin, audit).await?;
        info!(%user_id, is_super_admin, "super admin flag changed");
        Ok(())
    }

    /// The organization's audit trail, newest first.
    pub async fn list_audit(&self, ctx: &TenantContext, limit: usize) -> Result<Vec<AuditEntry>, AccessError> {
        self.gate.require(ctx, AUDIT_READ.as_str()).await?;
        Ok(self.store.list_audit(Some(ctx.organization_id()), limit).await?)
    }

    /// Organization-less entries (super-admin changes). Super admins only.
    pub async fn list_global_audit(&self, ctx: &TenantContext, limit: usize) -> Result<Vec<AuditEntry>, AccessError> {
        if !ctx.is_super_admin() {
            return Err(AccessError::denied("super-admin"));
        }
        Ok(self.store.list_audit(None, limit).await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    async fn fetch_role(&self, organization_id: OrganizationId, role_id: RoleId) -> Result<Role, AccessError> {
        validate_org_access(organization_id, self.store.get_role(organization_id, role_id).await?, "role")
    }

    async fn ensure_member(&self, user_id: UserId, organization_id: OrganizationId) -> Result<(), AccessError> {
        let active = self
            .store
            .get_membership(user_id, organization_id)
            .await?
            .is_some_and(|m| m.is_active);
        if active { Ok(()) } else { Err(AccessError::NotAMember) }
    }

    /// Map slugs to catalog ids, deduplicated. Unknown slugs are a
    /// validation error.
    async fn permission_ids<P: AsRef<str> + Sync>(
        &self,
        slugs: &[P],
    ) -> Result<BTreeMap<PermissionSlug, PermissionId>, AccessError> {
        if slugs.is_empty() {
            return Ok(BTreeMap::new());
        }
        let catalog: BTreeMap<PermissionSlug, PermissionId> = self
            .store
            .list_permissions()
            .await?
            .into_iter()
            .map(|p| (p.slug, p.id))
            .collect();

        slugs
            .iter()
            .map(|slug| {
                let slug = slug.as_ref();
                catalog
                    .get_key_value(slug)
                    .map(|(k, v)| (k.clone(), *v))
                    .ok_or_else(|| AccessError::Validation(format!("unknown permission '{slug}'")))
            })
            .collect()
    }
}

/// Reject the first permission the caller does not hold. Super admins pass.
fn ensure_held<P: AsRef<str>>(actor: &EffectivePermissionSet, permissions: &[P]) -> Result<(), AccessError> {
    if actor.is_super_admin() {
        return Ok(());
    }
    match permissions.iter().map(|p| p.as_ref()).find(|p| !actor.has_permission(p)) {
        Some(missing) => Err(AccessError::denied(missing)),
        None => Ok(()),
    }
}
