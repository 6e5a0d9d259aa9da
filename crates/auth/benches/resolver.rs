use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, Utc};
use docket_auth::{
    DirectOverride, EffectivePermissionSet, HeldRole, OverrideEffect, OverrideEntry, PermissionSlug, ResolverRows,
    Role, RoleAssignment, RoleGrantedPermission, default_catalog,
};
use docket_core::{OrganizationId, PermissionId, UserId};

/// Rows for a user holding `roles` roles, each carrying the full catalog,
/// plus one grant and one deny override per ten permissions.
fn rows(user_id: UserId, org_id: OrganizationId, roles: usize) -> ResolverRows {
    let earlier = Utc::now() - Duration::hours(1);
    let catalog: Vec<PermissionSlug> = default_catalog().into_iter().map(|(s, _)| s).collect();
    let mut rows = ResolverRows::default();

    for i in 0..roles {
        let role = Role::new(org_id, format!("role-{i}"), format!("Role {i}"), None, false, earlier).unwrap();
        let assignment = RoleAssignment::new(user_id, role.id, org_id, None, None, earlier).unwrap();
        for perm in &catalog {
            rows.role_permissions.push(RoleGrantedPermission {
                role_id: role.id,
                permission: perm.clone(),
            });
        }
        rows.held_roles.push(HeldRole { assignment, role });
    }

    for (i, perm) in catalog.iter().enumerate().step_by(10) {
        let effect = if i % 20 == 0 { OverrideEffect::Deny } else { OverrideEffect::Grant };
        rows.overrides.push(OverrideEntry {
            entry: DirectOverride::new(user_id, PermissionId::new(), org_id, effect, None, None, None, earlier).unwrap(),
            permission: perm.clone(),
        });
    }

    rows
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    let user_id = UserId::new();
    let org_id = OrganizationId::new();

    for roles in [1usize, 4, 16] {
        let input = rows(user_id, org_id, roles);
        group.throughput(Throughput::Elements(input.role_permissions.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(roles), &input, |b, input| {
            b.iter(|| EffectivePermissionSet::resolve(user_id, org_id, black_box(input), Utc::now()));
        });
    }

    group.finish();
}

fn bench_has_permission(c: &mut Criterion) {
    let user_id = UserId::new();
    let org_id = OrganizationId::new();
    let set = EffectivePermissionSet::resolve(user_id, org_id, &rows(user_id, org_id, 4), Utc::now());

    c.bench_function("has_permission", |b| {
        b.iter(|| set.has_permission(black_box("hearings:read-own")));
    });
}

criterion_group!(benches, bench_resolve, bench_has_permission);
criterion_main!(benches);
