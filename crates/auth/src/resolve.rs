//! Effective permission resolution (pure, no IO).
//!
//! Storage adapters fetch the candidate rows for one (user, organization);
//! this module decides which of them are live and merges them into a single
//! [`EffectivePermissionSet`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use docket_core::{OrganizationId, RoleId, UserId};

use crate::{DirectOverride, PermissionSlug, Role, RoleAssignment};

/// Role slug reported for super admins, who bypass organization-scoped
/// resolution entirely.
pub const SUPER_ADMIN_ROLE: &str = "super-admin";

/// A role assignment joined with the role it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldRole {
    pub assignment: RoleAssignment,
    pub role: Role,
}

/// One permission attached to a role through the role-permission mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrantedPermission {
    pub role_id: RoleId,
    pub permission: PermissionSlug,
}

/// A direct override joined with the slug of the permission it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideEntry {
    pub entry: DirectOverride,
    pub permission: PermissionSlug,
}

/// Rows fetched for one (user, organization).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverRows {
    pub held_roles: Vec<HeldRole>,
    pub role_permissions: Vec<RoleGrantedPermission>,
    pub overrides: Vec<OverrideEntry>,
}

/// Where a permission came from, kept for explanations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionSources {
    /// Live roles that carry the permission.
    pub roles: BTreeSet<String>,
    /// A live direct grant exists.
    pub granted: bool,
    /// A live direct deny exists; this removes the permission regardless of
    /// `roles` and `granted`.
    pub denied: bool,
}

/// The resolved (roles, permissions) of a user within an organization.
///
/// Recomputed on every check and never cached across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePermissionSet {
    super_admin: bool,
    role_slugs: BTreeSet<String>,
    permissions: BTreeSet<PermissionSlug>,
    #[serde(skip)]
    sources: BTreeMap<PermissionSlug, PermissionSources>,
}

impl EffectivePermissionSet {
    /// The unconditional super-admin bypass: the whole catalog plus the
    /// sentinel role.
    pub fn super_admin(catalog: impl IntoIterator<Item = PermissionSlug>) -> Self {
        Self {
            super_admin: true,
            role_slugs: BTreeSet::from([SUPER_ADMIN_ROLE.to_string()]),
            permissions: catalog.into_iter().collect(),
            sources: BTreeMap::new(),
        }
    }

    /// Merge role-derived permissions and direct overrides.
    ///
    /// `effective = (role_permissions ∪ granted) \ denied`. The union happens
    /// first and the denies are subtracted last, so an explicit deny beats
    /// both role membership and a direct grant.
    ///
    /// Rows belonging to another user or organization, rows that are not live
    /// at `now`, and assignments of soft-deleted roles are ignored.
    pub fn resolve(
        user_id: UserId,
        organization_id: OrganizationId,
        rows: &ResolverRows,
        now: DateTime<Utc>,
    ) -> Self {
        let mut live_roles: HashMap<RoleId, &str> = HashMap::new();
        for held in &rows.held_roles {
            let a = &held.assignment;
            if a.user_id != user_id
                || a.organization_id != organization_id
                || held.role.organization_id != organization_id
                || held.role.id != a.role_id
                || !held.role.is_active
                || !a.lifecycle(now).is_live()
            {
                continue;
            }
            live_roles.insert(held.role.id, held.role.slug.as_str());
        }

        let mut sources: BTreeMap<PermissionSlug, PermissionSources> = BTreeMap::new();
        let mut allowed: BTreeSet<PermissionSlug> = BTreeSet::new();

        for rp in &rows.role_permissions {
            if let Some(slug) = live_roles.get(&rp.role_id) {
                sources
                    .entry(rp.permission.clone())
                    .or_default()
                    .roles
                    .insert((*slug).to_string());
                allowed.insert(rp.permission.clone());
            }
        }

        let mut denied: BTreeSet<PermissionSlug> = BTreeSet::new();
        for o in &rows.overrides {
            let e = &o.entry;
            if e.user_id != user_id || e.organization_id != organization_id || !e.lifecycle(now).is_live() {
                continue;
            }
            let src = sources.entry(o.permission.clone()).or_default();
            if e.granted() {
                src.granted = true;
                allowed.insert(o.permission.clone());
            } else {
                src.denied = true;
                denied.insert(o.permission.clone());
            }
        }

        let permissions = allowed.difference(&denied).cloned().collect();

        Self {
            super_admin: false,
            role_slugs: live_roles.into_values().map(str::to_string).collect(),
            permissions,
            sources,
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.super_admin
    }

    pub fn role_slugs(&self) -> &BTreeSet<String> {
        &self.role_slugs
    }

    pub fn permission_slugs(&self) -> &BTreeSet<PermissionSlug> {
        &self.permissions
    }

    pub fn sources(&self, slug: &str) -> Option<&PermissionSources> {
        self.sources.get(slug)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Gate predicates
    // ─────────────────────────────────────────────────────────────────────────

    /// Super admins hold every permission, including slugs missing from the
    /// catalog.
    pub fn has_permission(&self, slug: &str) -> bool {
        self.super_admin || self.permissions.contains(slug)
    }

    /// True if at least one of `slugs` is held. An empty list is never satisfied.
    pub fn has_any_permission<S: AsRef<str>>(&self, slugs: &[S]) -> bool {
        slugs.iter().any(|s| self.has_permission(s.as_ref()))
    }

    /// True if every one of `slugs` is held. An empty list is always satisfied.
    pub fn has_all_permissions<S: AsRef<str>>(&self, slugs: &[S]) -> bool {
        slugs.iter().all(|s| self.has_permission(s.as_ref()))
    }

    pub fn has_role(&self, slug: &str) -> bool {
        self.role_slugs.contains(slug)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, slugs: &[S]) -> bool {
        slugs.iter().any(|s| self.has_role(s.as_ref()))
    }

    pub fn has_all_roles<S: AsRef<str>>(&self, slugs: &[S]) -> bool {
        slugs.iter().all(|s| self.has_role(s.as_ref()))
    }

    /// True if every permission in `other` is also held here.
    pub fn covers<'a>(&self, other: impl IntoIterator<Item = &'a PermissionSlug>) -> bool {
        other.into_iter().all(|p| self.has_permission(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use proptest::prelude::*;

    use super::*;
    use crate::{Lifecycle, OverrideEffect, Revocation};
    use docket_core::PermissionId;

    struct Fixture {
        user_id: UserId,
        org_id: OrganizationId,
        now: DateTime<Utc>,
        rows: ResolverRows,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                user_id: UserId::new(),
                org_id: OrganizationId::new(),
                now: Utc::now(),
                rows: ResolverRows::default(),
            }
        }

        fn role(&mut self, slug: &str, perms: &[&str], expires_at: Option<DateTime<Utc>>) -> RoleId {
            let role = Role::new(self.org_id, slug, slug, None, false, self.now).unwrap();
            let mut assignment = RoleAssignment::new(
                self.user_id,
                role.id,
                self.org_id,
                None,
                None,
                self.now - Duration::days(1),
            )
            .unwrap();
            assignment.expires_at = expires_at;
            for p in perms {
                self.rows.role_permissions.push(RoleGrantedPermission {
                    role_id: role.id,
                    permission: PermissionSlug::parse(p.to_string()).unwrap(),
                });
            }
            let id = role.id;
            self.rows.held_roles.push(HeldRole { assignment, role });
            id
        }

        fn direct(&mut self, slug: &str, effect: OverrideEffect, expires_at: Option<DateTime<Utc>>) {
            let mut entry = DirectOverride::new(
                self.user_id,
                PermissionId::new(),
                self.org_id,
                effect,
                None,
                None,
                None,
                self.now - Duration::days(1),
            )
            .unwrap();
            entry.expires_at = expires_at;
            self.rows.overrides.push(OverrideEntry {
                entry,
                permission: PermissionSlug::parse(slug.to_string()).unwrap(),
            });
        }

        fn resolve(&self) -> EffectivePermissionSet {
            EffectivePermissionSet::resolve(self.user_id, self.org_id, &self.rows, self.now)
        }
    }

    fn slugs(set: &EffectivePermissionSet) -> Vec<&str> {
        set.permission_slugs().iter().map(|p| p.as_str()).collect()
    }

    #[test]
    fn role_only_access() {
        let mut f = Fixture::new();
        f.role("clerk", &["evidence:create", "evidence:read"], None);
        let set = f.resolve();

        assert!(set.has_permission("evidence:create"));
        assert!(!set.has_permission("evidence:delete"));
        assert!(set.has_role("clerk"));
    }

    #[test]
    fn union_of_roles_and_grants_has_no_duplicates() {
        let mut f = Fixture::new();
        f.role("editor", &["cases:read", "cases:update"], None);
        f.direct("hearings:create", OverrideEffect::Grant, None);
        f.direct("cases:read", OverrideEffect::Grant, None);

        assert_eq!(slugs(&f.resolve()), vec!["cases:read", "cases:update", "hearings:create"]);
    }

    #[test]
    fn deny_overrides_role_and_grant() {
        let mut f = Fixture::new();
        f.role("editor", &["cases:update"], None);
        f.direct("cases:update", OverrideEffect::Grant, None);
        f.direct("cases:update", OverrideEffect::Deny, None);

        let set = f.resolve();
        assert!(!set.has_permission("cases:update"));
        let src = set.sources("cases:update").unwrap();
        assert!(src.denied && src.granted && src.roles.contains("editor"));
    }

    #[test]
    fn empty_role_still_allows_direct_grants() {
        let mut f = Fixture::new();
        f.role("empty", &[], None);
        f.direct("documents:read", OverrideEffect::Grant, None);

        let set = f.resolve();
        assert!(set.has_role("empty"));
        assert_eq!(slugs(&set), vec!["documents:read"]);
    }

    #[test]
    fn expiry_boundary_is_strict() {
        let mut f = Fixture::new();
        let now = f.now;
        f.role("at-now", &["cases:read"], Some(now));
        f.role("later", &["cases:update"], Some(now + Duration::seconds(1)));
        f.direct("hearings:read", OverrideEffect::Grant, Some(now));
        f.direct("hearings:update", OverrideEffect::Grant, Some(now + Duration::seconds(1)));
        f.direct("cases:update", OverrideEffect::Deny, Some(now));

        let set = f.resolve();
        assert_eq!(slugs(&set), vec!["cases:update", "hearings:update"]);
        assert!(!set.has_role("at-now"));
        assert!(set.has_role("later"));
    }

    #[test]
    fn revoked_and_foreign_rows_are_ignored() {
        let mut f = Fixture::new();
        f.role("revoked", &["cases:delete"], None);
        f.rows.held_roles[0].assignment.revocation = Some(Revocation { at: f.now, by: None });
        f.role("foreign", &["audit:read"], None);
        f.rows.held_roles[1].assignment.organization_id = OrganizationId::new();
        f.role("deleted", &["roles:create"], None);
        f.rows.held_roles[2].role.is_active = false;
        f.direct("cases:read", OverrideEffect::Deny, None);
        f.rows.overrides[0].entry.user_id = UserId::new();

        let set = f.resolve();
        assert!(set.permission_slugs().is_empty());
        assert!(set.role_slugs().is_empty());
        assert_eq!(f.rows.held_roles[0].assignment.lifecycle(f.now), Lifecycle::Revoked);
    }

    #[test]
    fn super_admin_bypasses_everything() {
        let set = EffectivePermissionSet::super_admin([PermissionSlug::from_static("cases:read")]);
        assert!(set.has_permission("cases:read"));
        assert!(set.has_permission("anything:at-all"));
        assert!(set.has_role(SUPER_ADMIN_ROLE));
        assert!(set.has_all_permissions(&["cases:delete", "audit:read"]));
    }

    #[test]
    fn any_and_all_predicates() {
        let mut f = Fixture::new();
        f.role("judge", &["cases:read", "hearings:read"], None);
        f.role("viewer", &["documents:read"], None);
        let set = f.resolve();

        assert!(set.has_any_permission(&["cases:delete", "cases:read"]));
        assert!(!set.has_any_permission::<&str>(&[]));
        assert!(set.has_all_permissions(&["cases:read", "hearings:read"]));
        assert!(!set.has_all_permissions(&["cases:read", "cases:delete"]));
        assert!(set.has_all_permissions::<&str>(&[]));
        assert!(set.has_any_role(&["owner", "judge"]));
        assert!(set.has_all_roles(&["judge", "viewer"]));
        assert!(!set.has_all_roles(&["judge", "owner"]));
    }

    fn slug_strategy() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "cases:read",
            "cases:update",
            "hearings:create",
            "evidence:read",
            "roles:assign",
            "audit:read",
        ])
        .prop_map(str::to_string)
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: effective = (role ∪ granted) \ denied, for any mix.
        #[test]
        fn deny_always_wins(
            role_perms in prop::collection::vec(slug_strategy(), 0..6),
            grants in prop::collection::vec(slug_strategy(), 0..4),
            denies in prop::collection::vec(slug_strategy(), 0..4),
        ) {
            let mut f = Fixture::new();
            let role_refs: Vec<&str> = role_perms.iter().map(String::as_str).collect();
            f.role("mixed", &role_refs, None);
            for g in &grants {
                f.direct(g, OverrideEffect::Grant, None);
            }
            for d in &denies {
                f.direct(d, OverrideEffect::Deny, None);
            }

            let set = f.resolve();
            let expected: BTreeSet<&str> = role_perms
                .iter()
                .chain(grants.iter())
                .map(String::as_str)
                .filter(|p| !denies.iter().any(|d| d.as_str() == *p))
                .collect();
            let actual: BTreeSet<&str> = set.permission_slugs().iter().map(|p| p.as_str()).collect();
            prop_assert_eq!(actual, expected);
            for d in &denies {
                prop_assert!(!set.has_permission(d));
            }
        }

        /// Property: a super admin passes every check.
        #[test]
        fn super_admin_holds_any_slug(resource in "[a-z]{1,12}", action in "[a-z-]{1,12}") {
            let set = EffectivePermissionSet::super_admin(Vec::new());
            let slug = format!("{resource}:{action}");
            prop_assert!(set.has_permission(&slug));
        }
    }
}
