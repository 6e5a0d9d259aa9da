use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use docket_auth::{
    AuditEntry, DirectOverride, HeldRole, Membership, Organization, OverrideEntry, Permission, PermissionSlug,
    Revocation, RevokeOutcome, Role, RoleAssignment, RoleGrantedPermission, UserAccount,
};
use docket_core::{AssignmentId, OrganizationId, OverrideId, PermissionId, RoleId, UserId};

use super::r#trait::{AuditLog, IdentityStore, OverrideStore, PermissionCatalog, RoleStore, TenantDirectory};
use crate::error::StoreError;
use crate::scope::{Condition, ScopedTable, scope_filter};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, UserAccount>,
    organizations: HashMap<OrganizationId, Organization>,
    memberships: HashMap<(UserId, OrganizationId), Membership>,
    permissions: HashMap<PermissionId, Permission>,
    roles: ScopedTable<RoleId, Role>,
    role_permissions: HashMap<RoleId, BTreeSet<PermissionId>>,
    assignments: ScopedTable<AssignmentId, RoleAssignment>,
    overrides: ScopedTable<OverrideId, DirectOverride>,
    audit: Vec<AuditEntry>,
}

impl Tables {
    fn active_role(&self, organization_id: OrganizationId, role_id: RoleId) -> Option<&Role> {
        self.roles.get(organization_id, &role_id).filter(|r| r.is_active)
    }

    fn slug_of(&self, permission_id: PermissionId) -> Result<PermissionSlug, StoreError> {
        self.permissions
            .get(&permission_id)
            .map(|p| p.slug.clone())
            .ok_or_else(|| StoreError::Corrupt(format!("dangling permission id {permission_id}")))
    }

    fn ensure_permissions_exist(&self, permissions: &[PermissionId]) -> Result<(), StoreError> {
        if permissions.iter().all(|id| self.permissions.contains_key(id)) {
            Ok(())
        } else {
            Err(StoreError::NotFound("permission"))
        }
    }

    fn override_entry(&self, entry: &DirectOverride) -> Result<OverrideEntry, StoreError> {
        Ok(OverrideEntry {
            entry: entry.clone(),
            permission: self.slug_of(entry.permission_id)?,
        })
    }
}

/// In-memory authorization store.
///
/// Intended for tests/dev. All tables live behind one lock, so a mutation
/// and its audit entry are applied together or not at all.
#[derive(Debug, Default)]
pub struct InMemoryAuthzStore {
    tables: RwLock<Tables>,
    audit_unavailable: AtomicBool,
}

impl InMemoryAuthzStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an audit sink outage: while set, every audit write fails and
    /// the paired mutation is not applied.
    pub fn set_audit_unavailable(&self, unavailable: bool) {
        self.audit_unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    /// Checked after validation and before any row changes.
    fn audit_writable(&self) -> Result<(), StoreError> {
        if self.audit_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::AuditWrite("audit log unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for InMemoryAuthzStore {
    async fn insert_user(&self, user: UserAccount) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if t.users.contains_key(&user.id) || t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("user {} already exists", user.email)));
        }
        t.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserAccount>, StoreError> {
        Ok(self.read()?.users.get(&user_id).cloned())
    }

    async fn set_current_organization(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> Result<(), StoreError> {
        let mut t = self.write()?;
        let user = t.users.get_mut(&user_id).ok_or(StoreError::NotFound("user"))?;
        user.current_organization_id = organization_id;
        Ok(())
    }

    async fn set_super_admin(&self, user_id: UserId, is_super_admin: bool, audit: AuditEntry) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if !t.users.contains_key(&user_id) {
            return Err(StoreError::NotFound("user"));
        }
        self.audit_writable()?;
        if let Some(user) = t.users.get_mut(&user_id) {
            user.is_super_admin = is_super_admin;
        }
        t.audit.push(audit);
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for InMemoryAuthzStore {
    async fn insert_organization(&self, organization: Organization) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if t.organizations.contains_key(&organization.id) {
            return Err(StoreError::Conflict(format!("organization {} already exists", organization.id)));
        }
        t.organizations.insert(organization.id, organization);
        Ok(())
    }

    async fn get_organization(&self, organization_id: OrganizationId) -> Result<Option<Organization>, StoreError> {
        Ok(self.read()?.organizations.get(&organization_id).cloned())
    }

    async fn list_all_organizations(&self) -> Result<Vec<Organization>, StoreError> {
        let mut orgs: Vec<_> = self.read()?.organizations.values().cloned().collect();
        orgs.sort_by_key(|o| (o.created_at, o.id));
        Ok(orgs)
    }

    async fn get_membership(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<Membership>, StoreError> {
        Ok(self.read()?.memberships.get(&(user_id, organization_id)).cloned())
    }

    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<Membership>, StoreError> {
        let mut out: Vec<_> = self
            .read()?
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| (m.joined_at, m.organization_id));
        Ok(out)
    }

    async fn list_members(&self, organization_id: OrganizationId) -> Result<Vec<Membership>, StoreError> {
        let filter = scope_filter(organization_id, [Condition::eq("is_active", true)]);
        let mut out: Vec<_> = self
            .read()?
            .memberships
            .values()
            .filter(|m| filter.matches(*m))
            .cloned()
            .collect();
        out.sort_by_key(|m| (m.joined_at, m.user_id));
        Ok(out)
    }

    async fn upsert_membership(&self, membership: Membership) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if !t.users.contains_key(&membership.user_id) {
            return Err(StoreError::NotFound("user"));
        }
        if !t.organizations.contains_key(&membership.organization_id) {
            return Err(StoreError::NotFound("organization"));
        }

        if membership.is_primary {
            for m in t.memberships.values_mut().filter(|m| m.user_id == membership.user_id) {
                m.is_primary = false;
            }
        }

        let key = (membership.user_id, membership.organization_id);
        match t.memberships.get_mut(&key) {
            Some(existing) => {
                existing.is_active = true;
                existing.is_primary = membership.is_primary;
            }
            None => {
                t.memberships.insert(key, membership);
            }
        }
        Ok(())
    }

    async fn deactivate_membership(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<bool, StoreError> {
        let mut t = self.write()?;
        let Some(m) = t.memberships.get_mut(&(user_id, organization_id)).filter(|m| m.is_active) else {
            return Ok(false);
        };
        m.is_active = false;
        m.is_primary = false;

        if let Some(user) = t.users.get_mut(&user_id) {
            if user.current_organization_id == Some(organization_id) {
                user.current_organization_id = None;
            }
        }
        Ok(true)
    }

    async fn set_primary_membership(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<(), StoreError> {
        let mut t = self.write()?;
        match t.memberships.get(&(user_id, organization_id)) {
            Some(m) if m.is_active => {}
            _ => return Err(StoreError::NotFound("membership")),
        }
        for m in t.memberships.values_mut().filter(|m| m.user_id == user_id) {
            m.is_primary = m.organization_id == organization_id;
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionCatalog for InMemoryAuthzStore {
    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        let mut out: Vec<_> = self.read()?.permissions.values().cloned().collect();
        out.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(out)
    }

    async fn get_permission_by_slug(&self, slug: &str) -> Result<Option<Permission>, StoreError> {
        Ok(self
            .read()?
            .permissions
            .values()
            .find(|p| p.slug.as_str() == slug)
            .cloned())
    }

    async fn seed_permissions(&self, permissions: Vec<Permission>) -> Result<usize, StoreError> {
        let mut t = self.write()?;
        let mut added = 0;
        for p in permissions {
            if t.permissions.values().any(|existing| existing.slug == p.slug) {
                continue;
            }
            t.permissions.insert(p.id, p);
            added += 1;
        }
        Ok(added)
    }
}

#[async_trait]
impl RoleStore for InMemoryAuthzStore {
    async fn get_role(&self, organization_id: OrganizationId, role_id: RoleId) -> Result<Option<Role>, StoreError> {
        Ok(self.read()?.active_role(organization_id, role_id).cloned())
    }

    async fn get_role_by_slug(&self, organization_id: OrganizationId, slug: &str) -> Result<Option<Role>, StoreError> {
        let filter = scope_filter(organization_id, [Condition::eq("slug", slug), Condition::eq("is_active", true)]);
        Ok(self.read()?.roles.find(&filter).next().cloned())
    }

    async fn list_roles(&self, organization_id: OrganizationId) -> Result<Vec<Role>, StoreError> {
        let filter = scope_filter(organization_id, [Condition::eq("is_active", true)]);
        let mut out: Vec<_> = self.read()?.roles.find(&filter).cloned().collect();
        out.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(out)
    }

    async fn role_permissions(
        &self,
        organization_id: OrganizationId,
        role_ids: &[RoleId],
    ) -> Result<Vec<RoleGrantedPermission>, StoreError> {
        let t = self.read()?;
        let mut out = Vec::new();
        for role_id in role_ids {
            if t.roles.get(organization_id, role_id).is_none() {
                continue;
            }
            for permission_id in t.role_permissions.get(role_id).into_iter().flatten() {
                out.push(RoleGrantedPermission {
                    role_id: *role_id,
                    permission: t.slug_of(*permission_id)?,
                });
            }
        }
        Ok(out)
    }

    async fn create_role(&self, role: Role, permissions: Vec<PermissionId>, audit: AuditEntry) -> Result<(), StoreError> {
        let mut t = self.write()?;
        let org = role.organization_id;
        let clash = scope_filter(org, [Condition::eq("slug", role.slug.as_str()), Condition::eq("is_active", true)]);
        if t.roles.count(&clash) > 0 {
            return Err(StoreError::Conflict(format!("role '{}' already exists", role.slug)));
        }
        t.ensure_permissions_exist(&permissions)?;
        self.audit_writable()?;

        t.role_permissions.insert(role.id, permissions.into_iter().collect());
        t.roles.insert(org, role.id, role);
        t.audit.push(audit);
        Ok(())
    }

    async fn update_role(&self, role: Role, audit: AuditEntry) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if t.active_role(role.organization_id, role.id).is_none() {
            return Err(StoreError::NotFound("role"));
        }
        self.audit_writable()?;

        t.roles.insert(role.organization_id, role.id, role);
        t.audit.push(audit);
        Ok(())
    }

    async fn replace_role_permissions(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
        permissions: Vec<PermissionId>,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if t.active_role(organization_id, role_id).is_none() {
            return Err(StoreError::NotFound("role"));
        }
        t.ensure_permissions_exist(&permissions)?;
        self.audit_writable()?;

        t.role_permissions.insert(role_id, permissions.into_iter().collect());
        t.audit.push(audit);
        Ok(())
    }

    async fn deactivate_role(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
        now: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if t.active_role(organization_id, role_id).is_none() {
            return Err(StoreError::NotFound("role"));
        }
        let live = scope_filter(
            organization_id,
            [
                Condition::eq("role_id", role_id),
                Condition::eq("is_active", true),
                Condition::unexpired_at(now),
            ],
        );
        if t.assignments.count(&live) > 0 {
            return Err(StoreError::Conflict("role still has active assignments".to_string()));
        }
        self.audit_writable()?;

        if let Some(role) = t.roles.get_mut(organization_id, &role_id) {
            role.is_active = false;
            role.updated_at = now;
        }
        t.audit.push(audit);
        Ok(())
    }

    async fn held_roles(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<HeldRole>, StoreError> {
        let t = self.read()?;
        let filter = scope_filter(
            organization_id,
            [
                Condition::eq("user_id", user_id),
                Condition::eq("is_active", true),
                Condition::unexpired_at(now),
            ],
        );
        Ok(t.assignments
            .find(&filter)
            .filter_map(|a| {
                t.active_role(organization_id, a.role_id).map(|role| HeldRole {
                    assignment: a.clone(),
                    role: role.clone(),
                })
            })
            .collect())
    }

    async fn get_assignment(
        &self,
        organization_id: OrganizationId,
        assignment_id: AssignmentId,
    ) -> Result<Option<RoleAssignment>, StoreError> {
        Ok(self.read()?.assignments.get(organization_id, &assignment_id).cloned())
    }

    async fn list_assignments(
        &self,
        organization_id: OrganizationId,
        user_id: Option<UserId>,
    ) -> Result<Vec<RoleAssignment>, StoreError> {
        let filter = scope_filter(organization_id, user_id.map(|u| Condition::eq("user_id", u)));
        let mut out: Vec<_> = self.read()?.assignments.find(&filter).cloned().collect();
        out.sort_by(|a, b| b.assigned_at.cmp(&a.assigned_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn insert_assignment(
        &self,
        assignment: RoleAssignment,
        now: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        let mut t = self.write()?;
        let org = assignment.organization_id;
        if t.active_role(org, assignment.role_id).is_none() {
            return Err(StoreError::NotFound("role"));
        }

        let same = scope_filter(
            org,
            [
                Condition::eq("user_id", assignment.user_id),
                Condition::eq("role_id", assignment.role_id),
                Condition::eq("is_active", true),
            ],
        );
        if t.assignments.find(&same).any(|a| a.lifecycle(now).is_live()) {
            return Err(StoreError::Conflict("role already assigned".to_string()));
        }
        self.audit_writable()?;

        t.assignments.update_where(&same, |stale| {
            stale.revocation = Some(Revocation { at: now, by: None });
        });
        t.assignments.insert(org, assignment.id, assignment);
        t.audit.push(audit);
        Ok(())
    }

    async fn revoke_assignment(
        &self,
        organization_id: OrganizationId,
        assignment_id: AssignmentId,
        revocation: Revocation,
        audit: AuditEntry,
    ) -> Result<RevokeOutcome, StoreError> {
        let mut t = self.write()?;
        let live = match t.assignments.get(organization_id, &assignment_id) {
            None => return Err(StoreError::NotFound("role assignment")),
            Some(a) => a.lifecycle(revocation.at).is_live(),
        };
        if !live {
            return Ok(RevokeOutcome::AlreadyInactive);
        }
        self.audit_writable()?;

        if let Some(a) = t.assignments.get_mut(organization_id, &assignment_id) {
            a.revocation = Some(revocation);
        }
        t.audit.push(audit);
        Ok(RevokeOutcome::Revoked)
    }
}

#[async_trait]
impl OverrideStore for InMemoryAuthzStore {
    async fn live_overrides(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<OverrideEntry>, StoreError> {
        let t = self.read()?;
        let filter = scope_filter(
            organization_id,
            [
                Condition::eq("user_id", user_id),
                Condition::eq("is_active", true),
                Condition::unexpired_at(now),
            ],
        );
        t.overrides.find(&filter).map(|o| t.override_entry(o)).collect()
    }

    async fn get_override(
        &self,
        organization_id: OrganizationId,
        override_id: OverrideId,
    ) -> Result<Option<DirectOverride>, StoreError> {
        Ok(self.read()?.overrides.get(organization_id, &override_id).cloned())
    }

    async fn list_overrides(
        &self,
        organization_id: OrganizationId,
        user_id: Option<UserId>,
    ) -> Result<Vec<OverrideEntry>, StoreError> {
        let t = self.read()?;
        let filter = scope_filter(organization_id, user_id.map(|u| Condition::eq("user_id", u)));
        let mut out = t
            .overrides
            .find(&filter)
            .map(|o| t.override_entry(o))
            .collect::<Result<Vec<_>, _>>()?;
        out.sort_by(|a, b| {
            b.entry
                .created_at
                .cmp(&a.entry.created_at)
                .then(b.entry.id.cmp(&a.entry.id))
        });
        Ok(out)
    }

    async fn insert_override(&self, entry: DirectOverride, audit: AuditEntry) -> Result<(), StoreError> {
        let mut t = self.write()?;
        let org = entry.organization_id;
        t.ensure_permissions_exist(&[entry.permission_id])?;

        let now = entry.created_at;
        let same = scope_filter(
            org,
            [
                Condition::eq("user_id", entry.user_id),
                Condition::eq("permission_id", entry.permission_id),
                Condition::eq("is_active", true),
            ],
        );
        if t.overrides.find(&same).any(|o| o.lifecycle(now).is_live()) {
            return Err(StoreError::Conflict("a live override already exists for this permission".to_string()));
        }
        self.audit_writable()?;

        t.overrides.update_where(&same, |stale| {
            stale.revocation = Some(Revocation { at: now, by: None });
        });
        t.overrides.insert(org, entry.id, entry);
        t.audit.push(audit);
        Ok(())
    }

    async fn revoke_override(
        &self,
        organization_id: OrganizationId,
        override_id: OverrideId,
        revocation: Revocation,
        audit: AuditEntry,
    ) -> Result<RevokeOutcome, StoreError> {
        let mut t = self.write()?;
        let live = match t.overrides.get(organization_id, &override_id) {
            None => return Err(StoreError::NotFound("direct override")),
            Some(o) => o.lifecycle(revocation.at).is_live(),
        };
        if !live {
            return Ok(RevokeOutcome::AlreadyInactive);
        }
        self.audit_writable()?;

        if let Some(o) = t.overrides.get_mut(organization_id, &override_id) {
            o.revocation = Some(revocation);
        }
        t.audit.push(audit);
        Ok(RevokeOutcome::Revoked)
    }
}

#[async_trait]
impl AuditLog for InMemoryAuthzStore {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let mut t = self.write()?;
        self.audit_writable()?;
        t.audit.push(entry);
        Ok(())
    }

    async fn list_audit(
        &self,
        organization_id: Option<OrganizationId>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let t = self.read()?;
        let mut out: Vec<_> = t
            .audit
            .iter()
            .rev()
            .filter(|e| e.organization_id == organization_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use docket_auth::{AuditAction, AuditEntity, OverrideEffect};

    use super::*;

    struct World {
        store: InMemoryAuthzStore,
        org: OrganizationId,
        user: UserId,
        role: Role,
        now: DateTime<Utc>,
    }

    fn audit(action: AuditAction, org: OrganizationId, now: DateTime<Utc>) -> AuditEntry {
        AuditEntry::new(None, action, AuditEntity::RoleAssignment, "x", "test", now).in_organization(org)
    }

    async fn world() -> World {
        let store = InMemoryAuthzStore::new();
        let now = Utc::now();
        let org = Organization::new("District Court", None, now);
        let user = UserAccount::new("clerk@court.example", now);
        let role = Role::new(org.id, "clerk", "Clerk", None, false, now).unwrap();
        let (org_id, user_id) = (org.id, user.id);

        store.insert_organization(org).await.unwrap();
        store.insert_user(user).await.unwrap();
        store
            .create_role(role.clone(), vec![], audit(AuditAction::RoleCreated, org_id, now))
            .await
            .unwrap();

        World {
            store,
            org: org_id,
            user: user_id,
            role,
            now,
        }
    }

    #[tokio::test]
    async fn failed_audit_write_leaves_no_trace() {
        let w = world().await;
        w.store.set_audit_unavailable(true);

        let a = RoleAssignment::new(w.user, w.role.id, w.org, None, None, w.now).unwrap();
        let err = w
            .store
            .insert_assignment(a, w.now, audit(AuditAction::RoleAssigned, w.org, w.now))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AuditWrite(_)));
        assert!(w.store.list_assignments(w.org, None).await.unwrap().is_empty());

        w.store.set_audit_unavailable(false);
        assert_eq!(w.store.list_audit(Some(w.org), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_expired_assignment_is_superseded() {
        let w = world().await;
        let expiry = w.now + Duration::minutes(5);
        let first = RoleAssignment::new(w.user, w.role.id, w.org, None, Some(expiry), w.now).unwrap();
        w.store
            .insert_assignment(first.clone(), w.now, audit(AuditAction::RoleAssigned, w.org, w.now))
            .await
            .unwrap();

        let dup = RoleAssignment::new(w.user, w.role.id, w.org, None, None, w.now).unwrap();
        let err = w
            .store
            .insert_assignment(dup, w.now, audit(AuditAction::RoleAssigned, w.org, w.now))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let later = expiry + Duration::seconds(1);
        let again = RoleAssignment::new(w.user, w.role.id, w.org, None, None, later).unwrap();
        w.store
            .insert_assignment(again.clone(), later, audit(AuditAction::RoleAssigned, w.org, later))
            .await
            .unwrap();

        let rows = w.store.list_assignments(w.org, Some(w.user)).await.unwrap();
        let active: Vec<_> = rows.iter().filter(|a| a.is_active()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, again.id);
        let old = w.store.get_assignment(w.org, first.id).await.unwrap().unwrap();
        assert_eq!(old.revocation, Some(Revocation { at: later, by: None }));
    }

    #[tokio::test]
    async fn stale_expired_override_is_superseded() {
        let w = world().await;
        let permission = Permission::new(PermissionSlug::from_static("cases:read"), None, w.now);
        let permission_id = permission.id;
        w.store.seed_permissions(vec![permission]).await.unwrap();

        let expiry = w.now + Duration::minutes(5);
        let grant = |expires_at, at| {
            DirectOverride::new(w.user, permission_id, w.org, OverrideEffect::Grant, None, None, expires_at, at).unwrap()
        };
        let first = grant(Some(expiry), w.now);
        w.store
            .insert_override(first.clone(), audit(AuditAction::PermissionGranted, w.org, w.now))
            .await
            .unwrap();

        let err = w
            .store
            .insert_override(grant(None, w.now), audit(AuditAction::PermissionGranted, w.org, w.now))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let later = expiry + Duration::seconds(1);
        let again = grant(None, later);
        w.store
            .insert_override(again.clone(), audit(AuditAction::PermissionGranted, w.org, later))
            .await
            .unwrap();

        let old = w.store.get_override(w.org, first.id).await.unwrap().unwrap();
        assert_eq!(old.revocation, Some(Revocation { at: later, by: None }));
        let new = w.store.get_override(w.org, again.id).await.unwrap().unwrap();
        assert_eq!(new.revocation, None);
    }

    #[tokio::test]
    async fn reads_are_bounded_by_organization() {
        let w = world().await;
        let other = OrganizationId::new();
        assert_eq!(w.store.get_role(other, w.role.id).await.unwrap(), None);
        assert!(w.store.list_roles(other).await.unwrap().is_empty());
        assert_eq!(w.store.list_roles(w.org).await.unwrap(), vec![w.role.clone()]);
    }

    #[tokio::test]
    async fn deactivating_a_membership_clears_the_matching_pointer() {
        let w = world().await;
        w.store
            .upsert_membership(Membership::new(w.user, w.org, true, w.now))
            .await
            .unwrap();
        w.store.set_current_organization(w.user, Some(w.org)).await.unwrap();

        assert!(w.store.deactivate_membership(w.user, w.org).await.unwrap());
        assert!(!w.store.deactivate_membership(w.user, w.org).await.unwrap());
        let user = w.store.get_user(w.user).await.unwrap().unwrap();
        assert_eq!(user.current_organization_id, None);
    }

    #[tokio::test]
    async fn audit_listing_is_newest_first_and_limited() {
        let w = world().await;
        for i in 1..=3 {
            w.store
                .record(audit(AuditAction::RoleUpdated, w.org, w.now + Duration::seconds(i)))
                .await
                .unwrap();
        }
        let entries = w.store.list_audit(Some(w.org), 2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].recorded_at > entries[1].recorded_at);
        assert_eq!(entries[0].recorded_at, w.now + Duration::seconds(3));
        assert!(w.store.list_audit(None, 10).await.unwrap().is_empty());
    }
}
