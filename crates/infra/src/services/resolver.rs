use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use docket_auth::{AuthorizationExplanation, EffectivePermissionSet, ResolverRows, explain};
use docket_core::{OrganizationId, RoleId, UserId};

use crate::error::AccessError;
use crate::store::AuthzStore;

/// Computes effective permission sets from the Role Store and Override
/// Store.
///
/// Nothing is cached: every call reads the current rows, so a revoke or an
/// expiry is visible to the very next check.
pub struct PermissionResolver<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for PermissionResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: AuthzStore + ?Sized> PermissionResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        is_super_admin: bool,
    ) -> Result<EffectivePermissionSet, AccessError> {
        self.resolve_at(user_id, organization_id, is_super_admin, Utc::now()).await
    }

    /// Resolve as of `now`.
    ///
    /// Super admins get the whole catalog before any organization-scoped
    /// read is made.
    #[instrument(skip(self), fields(user_id = %user_id, organization_id = %organization_id), err)]
    pub async fn resolve_at(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        is_super_admin: bool,
        now: DateTime<Utc>,
    ) -> Result<EffectivePermissionSet, AccessError> {
        if is_super_admin {
            let catalog = self.store.list_permissions().await?;
            debug!(permissions = catalog.len(), "super admin bypass");
            return Ok(EffectivePermissionSet::super_admin(catalog.into_iter().map(|p| p.slug)));
        }

        let (held_roles, overrides) = tokio::try_join!(
            self.store.held_roles(user_id, organization_id, now),
            self.store.live_overrides(user_id, organization_id, now),
        )?;

        let role_ids: Vec<RoleId> = held_roles.iter().map(|h| h.role.id).collect();
        let role_permissions = if role_ids.is_empty() {
            Vec::new()
        } else {
            self.store.role_permissions(organization_id, &role_ids).await?
        };

        let rows = ResolverRows {
            held_roles,
            role_permissions,
            overrides,
        };
        let set = EffectivePermissionSet::resolve(user_id, organization_id, &rows, now);
        debug!(
            roles = set.role_slugs().len(),
            permissions = set.permission_slugs().len(),
            "resolved effective permissions"
        );
        Ok(set)
    }

    /// Resolve and explain the decision for `permission`.
    pub async fn explain(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        is_super_admin: bool,
        permission: &str,
    ) -> Result<AuthorizationExplanation, AccessError> {
        let set = self.resolve(user_id, organization_id, is_super_admin).await?;
        Ok(explain(&set, permission))
    }

    /// Resolve using the user's stored super-admin flag. Unknown users
    /// resolve to an empty set.
    pub async fn resolve_user(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<EffectivePermissionSet, AccessError> {
        let is_super_admin = self
            .store
            .get_user(user_id)
            .await?
            .is_some_and(|u| u.is_super_admin);
        self.resolve(user_id, organization_id, is_super_admin).await
    }
}
