use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use docket_auth::{Membership, Organization, TenantContext, select_organization};
use docket_core::{OrganizationId, UserId};

use crate::error::AccessError;
use crate::store::AuthzStore;

/// Outcome of an organization switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    Switched,
    /// No active membership in the target organization; the pointer is
    /// unchanged.
    NotAMember,
}

/// Determines which organization a request acts in and manages the inputs
/// to that choice (current-organization pointer, memberships).
pub struct TenantContextResolver<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for TenantContextResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: AuthzStore + ?Sized> TenantContextResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Build the context for an authenticated user.
    ///
    /// `Ok(None)` means the user exists but has no usable organization; the
    /// caller should send them to organization selection. Unknown users are
    /// `Unauthenticated`.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn resolve_context(&self, user_id: UserId) -> Result<Option<TenantContext>, AccessError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(AccessError::Unauthenticated)?;
        let memberships = if user.current_organization_id.is_some() {
            Vec::new()
        } else {
            self.store.memberships_for_user(user_id).await?
        };

        let context = select_organization(&user, &memberships)
            .map(|organization_id| TenantContext::new(organization_id, user.id, user.is_super_admin));
        debug!(organization_id = ?context.map(|c| c.organization_id()), "resolved tenant context");
        Ok(context)
    }

    /// Like [`resolve_context`](Self::resolve_context), with a missing
    /// organization reported as [`AccessError::NoTenantContext`].
    pub async fn require_context(&self, user_id: UserId) -> Result<TenantContext, AccessError> {
        self.resolve_context(user_id).await?.ok_or(AccessError::NoTenantContext)
    }

    /// Point the user at `organization_id`. Super admins may switch to any
    /// existing organization; everybody else needs an active membership.
    #[instrument(skip(self), fields(user_id = %user_id, organization_id = %organization_id), err)]
    pub async fn switch_organization(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Switch, AccessError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(AccessError::Unauthenticated)?;

        let allowed = if user.is_super_admin {
            self.store.get_organization(organization_id).await?.is_some()
        } else {
            self.store
                .get_membership(user_id, organization_id)
                .await?
                .is_some_and(|m| m.is_active)
        };
        if !allowed {
            debug!("switch rejected: not a member");
            return Ok(Switch::NotAMember);
        }

        self.store
            .set_current_organization(user_id, Some(organization_id))
            .await?;
        info!("switched organization");
        Ok(Switch::Switched)
    }

    /// Create or reactivate a membership.
    #[instrument(skip(self), fields(user_id = %user_id, organization_id = %organization_id), err)]
    pub async fn join_organization(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        is_primary: bool,
    ) -> Result<Membership, AccessError> {
        let membership = Membership::new(user_id, organization_id, is_primary, Utc::now());
        self.store.upsert_membership(membership).await?;
        info!(is_primary, "membership activated");
        self.store
            .get_membership(user_id, organization_id)
            .await?
            .ok_or_else(|| AccessError::not_found("membership"))
    }

    /// Deactivate a membership, clearing the user's current-organization
    /// pointer if it referenced this organization. Returns `false` when there
    /// was nothing to deactivate.
    #[instrument(skip(self), fields(user_id = %user_id, organization_id = %organization_id), err)]
    pub async fn leave_organization(&self, user_id: UserId, organization_id: OrganizationId) -> Result<bool, AccessError> {
        let changed = self.store.deactivate_membership(user_id, organization_id).await?;
        if changed {
            info!("membership deactivated");
        }
        Ok(changed)
    }

    pub async fn set_primary(&self, user_id: UserId, organization_id: OrganizationId) -> Result<(), AccessError> {
        self.store.set_primary_membership(user_id, organization_id).await?;
        Ok(())
    }

    /// Active members of the context's organization.
    pub async fn list_members(&self, ctx: &TenantContext) -> Result<Vec<Membership>, AccessError> {
        Ok(self.store.list_members(ctx.organization_id()).await?)
    }

    /// Organizations the user actively belongs to.
    pub async fn organizations_of(&self, user_id: UserId) -> Result<Vec<Organization>, AccessError> {
        let memberships = self.store.memberships_for_user(user_id).await?;
        let mut out = Vec::new();
        for m in memberships.into_iter().filter(|m| m.is_active) {
            if let Some(org) = self.store.get_organization(m.organization_id).await? {
                out.push(org);
            }
        }
        Ok(out)
    }

    /// Cross-tenant listing for super-admin management screens.
    pub async fn list_all_organizations(&self, ctx: &TenantContext) -> Result<Vec<Organization>, AccessError> {
        if !ctx.is_super_admin() {
            return Err(AccessError::denied("super-admin"));
        }
        Ok(self.store.list_all_organizations().await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use docket_auth::UserAccount;

    use super::*;
    use crate::store::{IdentityStore, InMemoryAuthzStore, TenantDirectory};

    struct World {
        store: Arc<InMemoryAuthzStore>,
        tenancy: TenantContextResolver<InMemoryAuthzStore>,
        user: UserId,
        a: OrganizationId,
        b: OrganizationId,
    }

    async fn world() -> World {
        let store = Arc::new(InMemoryAuthzStore::new());
        let now = Utc::now();
        let a = Organization::new("Court A", None, now - Duration::days(10));
        let b = Organization::new("Court B", None, now - Duration::days(10));
        let user = UserAccount::new("judge@court.example", now);
        let (a_id, b_id, user_id) = (a.id, b.id, user.id);
        store.insert_organization(a).await.unwrap();
        store.insert_organization(b).await.unwrap();
        store.insert_user(user).await.unwrap();

        World {
            tenancy: TenantContextResolver::new(Arc::clone(&store)),
            store,
            user: user_id,
            a: a_id,
            b: b_id,
        }
    }

    #[tokio::test]
    async fn primary_membership_is_used_without_a_pointer() {
        let w = world().await;
        let now = Utc::now();
        w.store
            .upsert_membership(Membership::new(w.user, w.a, false, now - Duration::days(5)))
            .await
            .unwrap();
        w.store
            .upsert_membership(Membership::new(w.user, w.b, true, now))
            .await
            .unwrap();

        let ctx = w.tenancy.resolve_context(w.user).await.unwrap().unwrap();
        assert_eq!(ctx.organization_id(), w.b);
        assert!(!ctx.is_super_admin());
    }

    #[tokio::test]
    async fn user_without_memberships_has_no_context() {
        let w = world().await;
        assert_eq!(w.tenancy.resolve_context(w.user).await.unwrap(), None);
        assert_eq!(
            w.tenancy.require_context(w.user).await.unwrap_err(),
            AccessError::NoTenantContext
        );
    }

    #[tokio::test]
    async fn unknown_user_is_unauthenticated() {
        let w = world().await;
        assert_eq!(
            w.tenancy.resolve_context(UserId::new()).await.unwrap_err(),
            AccessError::Unauthenticated
        );
    }

    #[tokio::test]
    async fn switch_requires_an_active_membership() {
        let w = world().await;
        w.tenancy.join_organization(w.user, w.a, true).await.unwrap();

        assert_eq!(
            w.tenancy.switch_organization(w.user, w.b).await.unwrap(),
            Switch::NotAMember
        );
        let ctx = w.tenancy.require_context(w.user).await.unwrap();
        assert_eq!(ctx.organization_id(), w.a);

        w.tenancy.join_organization(w.user, w.b, false).await.unwrap();
        assert_eq!(
            w.tenancy.switch_organization(w.user, w.b).await.unwrap(),
            Switch::Switched
        );
        assert_eq!(w.tenancy.require_context(w.user).await.unwrap().organization_id(), w.b);
    }

    #[tokio::test]
    async fn super_admin_switches_anywhere() {
        let w = world().await;
        let mut admin = UserAccount::new("root@court.example", Utc::now());
        admin.is_super_admin = true;
        let admin_id = admin.id;
        w.store.insert_user(admin).await.unwrap();

        assert_eq!(
            w.tenancy.switch_organization(admin_id, w.b).await.unwrap(),
            Switch::Switched
        );
        let ctx = w.tenancy.require_context(admin_id).await.unwrap();
        assert_eq!(ctx.organization_id(), w.b);
        assert!(ctx.is_super_admin());
        assert_eq!(w.tenancy.list_all_organizations(&ctx).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn leaving_the_current_organization_falls_back_to_another() {
        let w = world().await;
        w.tenancy.join_organization(w.user, w.a, false).await.unwrap();
        w.tenancy.join_organization(w.user, w.b, false).await.unwrap();
        w.tenancy.switch_organization(w.user, w.b).await.unwrap();

        assert!(w.tenancy.leave_organization(w.user, w.b).await.unwrap());
        assert!(!w.tenancy.leave_organization(w.user, w.b).await.unwrap());
        assert_eq!(w.tenancy.require_context(w.user).await.unwrap().organization_id(), w.a);
        assert_eq!(
            w.tenancy.organizations_of(w.user).await.unwrap().iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![w.a]
        );
    }

    #[tokio::test]
    async fn cross_tenant_listing_is_super_admin_only() {
        let w = world().await;
        w.tenancy.join_organization(w.user, w.a, true).await.unwrap();
        let ctx = w.tenancy.require_context(w.user).await.unwrap();
        assert!(matches!(
            w.tenancy.list_all_organizations(&ctx).await,
            Err(AccessError::PermissionDenied { .. })
        ));
    }
}
