use std::collections::HashMap;
use std::hash::Hash;

use docket_core::OrganizationId;

use super::{Columns, OrgScoped, ScopedFilter, scope_row, validate_org_access};
use crate::error::AccessError;

/// In-memory table of organization-scoped rows.
///
/// Rows are keyed by id alone, as in a database; the organization is an
/// ordinary column. Every read takes a [`ScopedFilter`] or an organization,
/// so there is no unscoped access path. Locking is left to the owner so
/// several tables can change under one lock.
#[derive(Debug, Clone)]
pub struct ScopedTable<K, V> {
    rows: HashMap<K, V>,
}

impl<K, V> Default for ScopedTable<K, V> {
    fn default() -> Self {
        Self { rows: HashMap::new() }
    }
}

impl<K, V> ScopedTable<K, V>
where
    K: Eq + Hash,
    V: OrgScoped + Columns,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `row` stamped with `organization_id`, replacing any row with
    /// the same key.
    pub fn insert(&mut self, organization_id: OrganizationId, key: K, row: V) {
        self.rows.insert(key, scope_row(organization_id, row));
    }

    /// By-id read; a row owned by another organization is reported as
    /// `NotFound(entity)`.
    pub fn fetch(&self, organization_id: OrganizationId, key: &K, entity: &'static str) -> Result<&V, AccessError> {
        validate_org_access(organization_id, self.rows.get(key).map(Scoped), entity).map(|s| s.0)
    }

    pub fn get(&self, organization_id: OrganizationId, key: &K) -> Option<&V> {
        self.rows.get(key).filter(|row| row.organization_id() == organization_id)
    }

    pub fn get_mut(&mut self, organization_id: OrganizationId, key: &K) -> Option<&mut V> {
        self.rows
            .get_mut(key)
            .filter(|row| row.organization_id() == organization_id)
    }

    pub fn find<'a>(&'a self, filter: &'a ScopedFilter) -> impl Iterator<Item = &'a V> + 'a {
        self.rows.values().filter(move |row| filter.matches(*row))
    }

    pub fn count(&self, filter: &ScopedFilter) -> usize {
        self.find(filter).count()
    }

    /// Apply `f` to every matching row; returns how many were touched.
    pub fn update_where(&mut self, filter: &ScopedFilter, mut f: impl FnMut(&mut V)) -> usize {
        let mut touched = 0;
        for row in self.rows.values_mut().filter(|row| filter.matches(&**row)) {
            f(row);
            touched += 1;
        }
        touched
    }
}

/// Borrowed row adapter so `validate_org_access` can run without cloning.
struct Scoped<'a, V>(&'a V);

impl<V: OrgScoped> OrgScoped for Scoped<'_, V> {
    fn organization_id(&self) -> OrganizationId {
        self.0.organization_id()
    }

    fn set_organization_id(&mut self, _organization_id: OrganizationId) {}
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use docket_auth::Role;

    use super::*;
    use crate::scope::{Condition, scope_filter};

    fn role(org: OrganizationId, slug: &str) -> Role {
        Role::new(org, slug, slug, None, false, Utc::now()).unwrap()
    }

    #[test]
    fn org_isolation_on_find_and_fetch() {
        let org_a = OrganizationId::new();
        let org_b = OrganizationId::new();
        let mut table = ScopedTable::new();

        let a = role(org_a, "clerk");
        let b = role(org_b, "clerk");
        table.insert(org_a, a.id, a.clone());
        table.insert(org_b, b.id, b.clone());

        let filter = scope_filter(org_a, []);
        let found: Vec<_> = table.find(&filter).collect();
        assert_eq!(found, vec![&a]);

        assert_eq!(table.fetch(org_a, &b.id, "role"), Err(AccessError::not_found("role")));
        assert!(table.get_mut(org_a, &b.id).is_none());
        assert_eq!(table.fetch(org_b, &b.id, "role").unwrap(), &b);
    }

    #[test]
    fn insert_stamps_the_given_organization() {
        let org = OrganizationId::new();
        let mut table = ScopedTable::new();
        let r = role(OrganizationId::new(), "judge");
        table.insert(org, r.id, r.clone());
        assert_eq!(table.get(org, &r.id).map(|r| r.organization_id), Some(org));
    }

    #[test]
    fn update_where_touches_only_the_scoped_rows() {
        let org_a = OrganizationId::new();
        let org_b = OrganizationId::new();
        let mut table = ScopedTable::new();
        for (org, slug) in [(org_a, "one"), (org_a, "two"), (org_b, "one")] {
            let r = role(org, slug);
            table.insert(org, r.id, r);
        }

        let touched = table.update_where(&scope_filter(org_a, [Condition::eq("slug", "one")]), |r| {
            r.is_active = false
        });
        assert_eq!(touched, 1);
        assert_eq!(table.count(&scope_filter(org_b, [Condition::eq("is_active", true)])), 1);
    }

    proptest! {
        #[test]
        fn scoped_reads_never_leak_foreign_rows(owners in proptest::collection::vec(0usize..3, 0..24)) {
            let orgs = [OrganizationId::new(), OrganizationId::new(), OrganizationId::new()];
            let mut table = ScopedTable::new();
            let mut ids = Vec::new();
            for (n, owner) in owners.iter().enumerate() {
                let r = role(orgs[*owner], &format!("role-{n}"));
                ids.push((r.id, *owner));
                table.insert(orgs[*owner], r.id, r);
            }

            for (i, org) in orgs.iter().enumerate() {
                let expected = owners.iter().filter(|o| **o == i).count();
                prop_assert_eq!(table.count(&scope_filter(*org, [])), expected);
                prop_assert!(table.find(&scope_filter(*org, [])).all(|r| r.organization_id == *org));
                for (id, owner) in &ids {
                    prop_assert_eq!(table.get(*org, id).is_some(), *owner == i);
                }
            }
        }
    }
}
