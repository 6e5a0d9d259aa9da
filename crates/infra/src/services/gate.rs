use std::sync::Arc;

use tracing::debug;

use docket_auth::{AuthorizationExplanation, EffectivePermissionSet, TenantContext, explain};

use crate::error::AccessError;
use crate::services::PermissionResolver;
use crate::store::AuthzStore;

/// Boolean predicates over the caller's effective permission set.
///
/// Each predicate resolves afresh for the request's [`TenantContext`];
/// callers that need several answers for one request should call
/// [`AccessGate::effective`] once and query the set directly.
pub struct AccessGate<S: ?Sized> {
    resolver: PermissionResolver<S>,
}

impl<S: ?Sized> Clone for AccessGate<S> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
        }
    }
}

impl<S: AuthzStore + ?Sized> AccessGate<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            resolver: PermissionResolver::new(store),
        }
    }

    pub fn resolver(&self) -> &PermissionResolver<S> {
        &self.resolver
    }

    pub async fn effective(&self, ctx: &TenantContext) -> Result<EffectivePermissionSet, AccessError> {
        self.resolver
            .resolve(ctx.user_id(), ctx.organization_id(), ctx.is_super_admin())
            .await
    }

    pub async fn has_permission(&self, ctx: &TenantContext, permission: &str) -> Result<bool, AccessError> {
        Ok(self.effective(ctx).await?.has_permission(permission))
    }

    pub async fn has_any_permission<P: AsRef<str> + Sync>(
        &self,
        ctx: &TenantContext,
        permissions: &[P],
    ) -> Result<bool, AccessError> {
        Ok(self.effective(ctx).await?.has_any_permission(permissions))
    }

    pub async fn has_all_permissions<P: AsRef<str> + Sync>(
        &self,
        ctx: &TenantContext,
        permissions: &[P],
    ) -> Result<bool, AccessError> {
        Ok(self.effective(ctx).await?.has_all_permissions(permissions))
    }

    pub async fn has_role(&self, ctx: &TenantContext, role: &str) -> Result<bool, AccessError> {
        Ok(self.effective(ctx).await?.has_role(role))
    }

    pub async fn has_any_role<R: AsRef<str> + Sync>(&self, ctx: &TenantContext, roles: &[R]) -> Result<bool, AccessError> {
        Ok(self.effective(ctx).await?.has_any_role(roles))
    }

    pub async fn has_all_roles<R: AsRef<str> + Sync>(&self, ctx: &TenantContext, roles: &[R]) -> Result<bool, AccessError> {
        Ok(self.effective(ctx).await?.has_all_roles(roles))
    }

    /// Like [`has_permission`](Self::has_permission) but turns `false` into
    /// [`AccessError::PermissionDenied`]. Returns the resolved set so callers
    /// can keep using it for the rest of the request.
    pub async fn require(&self, ctx: &TenantContext, permission: &str) -> Result<EffectivePermissionSet, AccessError> {
        let set = self.effective(ctx).await?;
        if !set.has_permission(permission) {
            debug!(user_id = %ctx.user_id(), organization_id = %ctx.organization_id(), permission, "permission denied");
            return Err(AccessError::denied(permission));
        }
        Ok(set)
    }

    pub async fn require_any<P: AsRef<str> + Sync>(
        &self,
        ctx: &TenantContext,
        permissions: &[P],
    ) -> Result<EffectivePermissionSet, AccessError> {
        let set = self.effective(ctx).await?;
        if !set.has_any_permission(permissions) {
            let wanted = join(permissions, " | ");
            debug!(user_id = %ctx.user_id(), organization_id = %ctx.organization_id(), permission = %wanted, "permission denied");
            return Err(AccessError::denied(wanted));
        }
        Ok(set)
    }

    /// Denies with the first missing permission.
    pub async fn require_all<P: AsRef<str> + Sync>(
        &self,
        ctx: &TenantContext,
        permissions: &[P],
    ) -> Result<EffectivePermissionSet, AccessError> {
        let set = self.effective(ctx).await?;
        if let Some(missing) = permissions.iter().map(|p| p.as_ref()).find(|p| !set.has_permission(p)) {
            debug!(user_id = %ctx.user_id(), organization_id = %ctx.organization_id(), permission = missing, "permission denied");
            return Err(AccessError::denied(missing));
        }
        Ok(set)
    }

    pub async fn explain(&self, ctx: &TenantContext, permission: &str) -> Result<AuthorizationExplanation, AccessError> {
        Ok(explain(&self.effective(ctx).await?, permission))
    }
}

fn join<P: AsRef<str>>(items: &[P], sep: &str) -> String {
    items.iter().map(|i| i.as_ref()).collect::<Vec<&str>>().join(sep)
}
