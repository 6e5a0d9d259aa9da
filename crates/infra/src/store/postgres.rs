//! Postgres-backed authorization store.
//!
//! Organization-scoped reads and inserts are built with [`QueryBuilder`]
//! through the same [`ScopedFilter`] / [`RowValues`] path the in-memory
//! backend evaluates, so the tenant predicate is never written by hand.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Unavailable` |
//! | Decode / column errors | N/A | `Corrupt` |
//! | PoolClosed, Io, other | N/A | `Unavailable` |
//!
//! Failures while writing the audit row inside a mutation's transaction map
//! to `AuditWrite`; the transaction is dropped (rolled back) with it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use docket_auth::{
    AuditAction, AuditEntity, AuditEntry, DirectOverride, HeldRole, Membership, OverrideEffect, OverrideEntry,
    Organization, Permission, PermissionSlug, Revocation, RevokeOutcome, Role, RoleAssignment, RoleGrantedPermission,
    UserAccount,
};
use docket_core::{AssignmentId, OrganizationId, OverrideId, PermissionId, RoleId, UserId};

use super::r#trait::{AuditLog, IdentityStore, OverrideStore, PermissionCatalog, RoleStore, TenantDirectory};
use crate::error::StoreError;
use crate::scope::{Condition, RowValues, ScopedFilter, scope_filter, scope_insert};

const SCHEMA: &str = include_str!("../../migrations/0001_authz.sql");

const ASSIGNMENT_COLUMNS: &str = "id, user_id, role_id, organization_id, assigned_by, assigned_at, expires_at, \
     is_active, revoked_at, revoked_by";

const OVERRIDE_COLUMNS: &str = "id, user_id, permission_id, organization_id, granted, reason, created_by, created_at, \
     expires_at, is_active, revoked_at, revoked_by";

const ROLE_COLUMNS: &str = "id, organization_id, slug, name, description, is_system, is_active, created_at, updated_at";

const AUDIT_COLUMNS: &str =
    "id, organization_id, actor_id, action, entity_type, entity_id, description, metadata, recorded_at";

/// Postgres-backed authorization store.
///
/// Every mutation runs in one transaction together with its audit row.
#[derive(Debug, Clone)]
pub struct PostgresAuthzStore {
    pool: Arc<PgPool>,
}

impl PostgresAuthzStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool against `url`.
    #[instrument(skip(url), err)]
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
    tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))
}

/// Write the audit row inside the mutation's transaction.
async fn insert_audit(tx: &mut Transaction<'static, Postgres>, entry: &AuditEntry) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (
            id, organization_id, actor_id, action, entity_type, entity_id, description, metadata, recorded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(entry.organization_id.map(Uuid::from))
    .bind(entry.actor.map(Uuid::from))
    .bind(entry.action.as_str())
    .bind(entry.entity_type.as_str())
    .bind(&entry.entity_id)
    .bind(&entry.description)
    .bind(&entry.metadata)
    .bind(entry.recorded_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::AuditWrite(e.to_string()))?;
    Ok(())
}

async fn ensure_active_role(
    tx: &mut Transaction<'static, Postgres>,
    organization_id: OrganizationId,
    role_id: RoleId,
) -> Result<(), StoreError> {
    let filter = scope_filter(
        organization_id,
        [Condition::eq("id", role_id), Condition::eq("is_active", true)],
    );
    let mut qb = QueryBuilder::new("SELECT id FROM roles");
    filter.push_where(&mut qb);
    qb.push(" FOR UPDATE");
    qb.build()
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_role", e))?
        .map(|_| ())
        .ok_or(StoreError::NotFound("role"))
}

async fn insert_role_permissions(
    tx: &mut Transaction<'static, Postgres>,
    role_id: RoleId,
    permissions: &[PermissionId],
) -> Result<(), StoreError> {
    for permission_id in permissions {
        sqlx::query("INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(role_id.as_uuid())
            .bind(permission_id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(|e| match map_sqlx_error("insert_role_permission", e) {
                StoreError::NotFound(_) => StoreError::NotFound("permission"),
                other => other,
            })?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl IdentityStore for PostgresAuthzStore {
    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert_user(&self, user: UserAccount) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, email, is_super_admin, current_organization_id, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(user.is_super_admin)
        .bind(user.current_organization_id.map(Uuid::from))
        .bind(user.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserAccount>, StoreError> {
        let row = sqlx::query(
            "SELECT id, email, is_super_admin, current_organization_id, created_at FROM users WHERE id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn set_current_organization(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET current_organization_id = $1 WHERE id = $2")
            .bind(organization_id.map(Uuid::from))
            .bind(user_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_current_organization", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("user"));
        }
        Ok(())
    }

    #[instrument(skip(self, audit), err)]
    async fn set_super_admin(&self, user_id: UserId, is_super_admin: bool, audit: AuditEntry) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let result = sqlx::query("UPDATE users SET is_super_admin = $1 WHERE id = $2")
            .bind(is_super_admin)
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_super_admin", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("user"));
        }
        insert_audit(&mut tx, &audit).await?;
        commit(tx).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenant directory
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl TenantDirectory for PostgresAuthzStore {
    #[instrument(skip(self, organization), fields(organization_id = %organization.id), err)]
    async fn insert_organization(&self, organization: Organization) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO organizations (id, name, parent_id, is_active, created_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(organization.id.as_uuid())
            .bind(&organization.name)
            .bind(organization.parent_id.map(Uuid::from))
            .bind(organization.is_active)
            .bind(organization.created_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_organization", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_organization(&self, organization_id: OrganizationId) -> Result<Option<Organization>, StoreError> {
        let row = sqlx::query("SELECT id, name, parent_id, is_active, created_at FROM organizations WHERE id = $1")
            .bind(organization_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_organization", e))?;
        row.as_ref().map(organization_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_all_organizations(&self) -> Result<Vec<Organization>, StoreError> {
        let rows = sqlx::query("SELECT id, name, parent_id, is_active, created_at FROM organizations ORDER BY created_at, id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_all_organizations", e))?;
        rows.iter().map(organization_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn get_membership(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<Membership>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, organization_id, is_active, is_primary, joined_at FROM memberships \
             WHERE user_id = $1 AND organization_id = $2",
        )
        .bind(user_id.as_uuid())
        .bind(organization_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_membership", e))?;
        row.as_ref().map(membership_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<Membership>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, organization_id, is_active, is_primary, joined_at FROM memberships \
             WHERE user_id = $1 ORDER BY joined_at, organization_id",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("memberships_for_user", e))?;
        rows.iter().map(membership_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn list_members(&self, organization_id: OrganizationId) -> Result<Vec<Membership>, StoreError> {
        let filter = scope_filter(organization_id, [Condition::eq("is_active", true)]);
        let mut qb = QueryBuilder::new("SELECT user_id, organization_id, is_active, is_primary, joined_at FROM memberships");
        filter.push_where(&mut qb);
        qb.push(" ORDER BY joined_at, user_id");
        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_members", e))?;
        rows.iter().map(membership_from_row).collect()
    }

    #[instrument(skip(self, membership), fields(user_id = %membership.user_id, organization_id = %membership.organization_id), err)]
    async fn upsert_membership(&self, membership: Membership) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        if membership.is_primary {
            sqlx::query("UPDATE memberships SET is_primary = FALSE WHERE user_id = $1")
                .bind(membership.user_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("clear_primary", e))?;
        }
        sqlx::query(
            r#"
            INSERT INTO memberships (user_id, organization_id, is_active, is_primary, joined_at)
            VALUES ($1, $2, TRUE, $3, $4)
            ON CONFLICT (user_id, organization_id)
            DO UPDATE SET is_active = TRUE, is_primary = EXCLUDED.is_primary
            "#,
        )
        .bind(membership.user_id.as_uuid())
        .bind(membership.organization_id.as_uuid())
        .bind(membership.is_primary)
        .bind(membership.joined_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_membership", e))?;
        commit(tx).await
    }

    #[instrument(skip(self), err)]
    async fn deactivate_membership(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            "UPDATE memberships SET is_active = FALSE, is_primary = FALSE \
             WHERE user_id = $1 AND organization_id = $2 AND is_active",
        )
        .bind(user_id.as_uuid())
        .bind(organization_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("deactivate_membership", e))?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        sqlx::query("UPDATE users SET current_organization_id = NULL WHERE id = $1 AND current_organization_id = $2")
            .bind(user_id.as_uuid())
            .bind(organization_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_current_organization", e))?;
        commit(tx).await?;
        Ok(true)
    }

    #[instrument(skip(self), err)]
    async fn set_primary_membership(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let exists = sqlx::query(
            "SELECT 1 FROM memberships WHERE user_id = $1 AND organization_id = $2 AND is_active FOR UPDATE",
        )
        .bind(user_id.as_uuid())
        .bind(organization_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_membership", e))?;
        if exists.is_none() {
            return Err(StoreError::NotFound("membership"));
        }
        sqlx::query("UPDATE memberships SET is_primary = (organization_id = $2) WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .bind(organization_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_primary_membership", e))?;
        commit(tx).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission catalog
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PermissionCatalog for PostgresAuthzStore {
    #[instrument(skip(self), err)]
    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query("SELECT id, slug, description, created_at FROM permissions ORDER BY slug")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_permissions", e))?;
        rows.iter().map(permission_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn get_permission_by_slug(&self, slug: &str) -> Result<Option<Permission>, StoreError> {
        let row = sqlx::query("SELECT id, slug, description, created_at FROM permissions WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_permission_by_slug", e))?;
        row.as_ref().map(permission_from_row).transpose()
    }

    #[instrument(skip(self, permissions), fields(count = permissions.len()), err)]
    async fn seed_permissions(&self, permissions: Vec<Permission>) -> Result<usize, StoreError> {
        let mut tx = self.begin().await?;
        let mut added = 0;
        for p in &permissions {
            let result = sqlx::query(
                "INSERT INTO permissions (id, slug, resource, action, description, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (slug) DO NOTHING",
            )
            .bind(p.id.as_uuid())
            .bind(p.slug.as_str())
            .bind(p.resource())
            .bind(p.action())
            .bind(&p.description)
            .bind(p.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("seed_permission", e))?;
            added += result.rows_affected() as usize;
        }
        commit(tx).await?;
        Ok(added)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles and assignments
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl RoleStore for PostgresAuthzStore {
    #[instrument(skip(self), err)]
    async fn get_role(&self, organization_id: OrganizationId, role_id: RoleId) -> Result<Option<Role>, StoreError> {
        let filter = scope_filter(
            organization_id,
            [Condition::eq("id", role_id), Condition::eq("is_active", true)],
        );
        let mut qb = QueryBuilder::new(format!("SELECT {ROLE_COLUMNS} FROM roles"));
        filter.push_where(&mut qb);
        let row = qb
            .build()
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?;
        row.as_ref().map(|r| role_from_row(r, "")).transpose()
    }

    #[instrument(skip(self), err)]
    async fn get_role_by_slug(&self, organization_id: OrganizationId, slug: &str) -> Result<Option<Role>, StoreError> {
        let filter = scope_filter(
            organization_id,
            [Condition::eq("slug", slug), Condition::eq("is_active", true)],
        );
        let mut qb = QueryBuilder::new(format!("SELECT {ROLE_COLUMNS} FROM roles"));
        filter.push_where(&mut qb);
        let row = qb
            .build()
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role_by_slug", e))?;
        row.as_ref().map(|r| role_from_row(r, "")).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self, organization_id: OrganizationId) -> Result<Vec<Role>, StoreError> {
        let filter = scope_filter(organization_id, [Condition::eq("is_active", true)]);
        let mut qb = QueryBuilder::new(format!("SELECT {ROLE_COLUMNS} FROM roles"));
        filter.push_where(&mut qb);
        qb.push(" ORDER BY slug");
        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;
        rows.iter().map(|r| role_from_row(r, "")).collect()
    }

    #[instrument(skip(self, role_ids), fields(roles = role_ids.len()), err)]
    async fn role_permissions(
        &self,
        organization_id: OrganizationId,
        role_ids: &[RoleId],
    ) -> Result<Vec<RoleGrantedPermission>, StoreError> {
        if role_ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = role_ids.iter().map(|r| *r.as_uuid()).collect();
        let filter = scope_filter(organization_id, []);
        let mut qb = QueryBuilder::new("WITH r AS (SELECT id FROM roles");
        filter.push_where(&mut qb);
        qb.push(
            ") SELECT rp.role_id, p.slug FROM role_permissions rp \
             JOIN r ON r.id = rp.role_id \
             JOIN permissions p ON p.id = rp.permission_id \
             WHERE rp.role_id = ANY(",
        );
        qb.push_bind(ids);
        qb.push(")");
        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_permissions", e))?;
        rows.iter()
            .map(|row| {
                Ok(RoleGrantedPermission {
                    role_id: RoleId::from_uuid(get(row, "role_id")?),
                    permission: slug_from(get(row, "slug")?)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, role, permissions, audit), fields(organization_id = %role.organization_id, slug = %role.slug), err)]
    async fn create_role(&self, role: Role, permissions: Vec<PermissionId>, audit: AuditEntry) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let values = scope_insert(
            role.organization_id,
            RowValues::new()
                .set("id", role.id)
                .set("slug", role.slug.as_str())
                .set("name", role.name.as_str())
                .set("description", role.description.clone())
                .set("is_system", role.is_system)
                .set("is_active", role.is_active)
                .set("created_at", role.created_at)
                .set("updated_at", role.updated_at),
        );
        let mut qb = QueryBuilder::new("");
        values.push_insert("roles", &mut qb);
        qb.build()
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_role", e))?;

        insert_role_permissions(&mut tx, role.id, &permissions).await?;
        insert_audit(&mut tx, &audit).await?;
        commit(tx).await
    }

    #[instrument(skip(self, role, audit), fields(organization_id = %role.organization_id, role_id = %role.id), err)]
    async fn update_role(&self, role: Role, audit: AuditEntry) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let filter = scope_filter(
            role.organization_id,
            [Condition::eq("id", role.id), Condition::eq("is_active", true)],
        );
        let mut qb = QueryBuilder::new("UPDATE roles SET name = ");
        qb.push_bind(role.name.clone())
            .push(", description = ")
            .push_bind(role.description.clone())
            .push(", updated_at = ")
            .push_bind(role.updated_at);
        filter.push_where(&mut qb);
        let result = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("role"));
        }
        insert_audit(&mut tx, &audit).await?;
        commit(tx).await
    }

    #[instrument(skip(self, permissions, audit), fields(count = permissions.len()), err)]
    async fn replace_role_permissions(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
        permissions: Vec<PermissionId>,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        ensure_active_role(&mut tx, organization_id, role_id).await?;
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_role_permissions", e))?;
        insert_role_permissions(&mut tx, role_id, &permissions).await?;
        insert_audit(&mut tx, &audit).await?;
        commit(tx).await
    }

    #[instrument(skip(self, audit), err)]
    async fn deactivate_role(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
        now: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        ensure_active_role(&mut tx, organization_id, role_id).await?;

        let live = scope_filter(
            organization_id,
            [
                Condition::eq("role_id", role_id),
                Condition::eq("is_active", true),
                Condition::unexpired_at(now),
            ],
        );
        let mut qb = QueryBuilder::new("SELECT COUNT(*) AS n FROM role_assignments");
        live.push_where(&mut qb);
        let row = qb
            .build()
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("count_live_assignments", e))?;
        if get::<i64>(&row, "n")? > 0 {
            return Err(StoreError::Conflict("role still has active assignments".to_string()));
        }

        let filter = scope_filter(organization_id, [Condition::eq("id", role_id)]);
        let mut qb = QueryBuilder::new("UPDATE roles SET is_active = FALSE, updated_at = ");
        qb.push_bind(now);
        filter.push_where(&mut qb);
        qb.build()
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("deactivate_role", e))?;

        insert_audit(&mut tx, &audit).await?;
        commit(tx).await
    }

    #[instrument(skip(self), err)]
    async fn held_roles(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<HeldRole>, StoreError> {
        let filter = scope_filter(
            organization_id,
            [
                Condition::eq("user_id", user_id),
                Condition::eq("is_active", true),
                Condition::unexpired_at(now),
            ],
        );
        let mut qb = QueryBuilder::new(format!("WITH a AS (SELECT {ASSIGNMENT_COLUMNS} FROM role_assignments"));
        filter.push_where(&mut qb);
        qb.push(
            ") SELECT a.*, \
                r.id AS role_id_, r.organization_id AS role_organization_id, r.slug AS role_slug, \
                r.name AS role_name, r.description AS role_description, r.is_system AS role_is_system, \
                r.is_active AS role_is_active, r.created_at AS role_created_at, r.updated_at AS role_updated_at \
             FROM a JOIN roles r ON r.id = a.role_id AND r.organization_id = a.organization_id \
             WHERE r.is_active",
        );
        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("held_roles", e))?;
        rows.iter()
            .map(|row| {
                Ok(HeldRole {
                    assignment: assignment_from_row(row)?,
                    role: role_from_row(row, "role_")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn get_assignment(
        &self,
        organization_id: OrganizationId,
        assignment_id: AssignmentId,
    ) -> Result<Option<RoleAssignment>, StoreError> {
        let filter = scope_filter(organization_id, [Condition::eq("id", assignment_id)]);
        let mut qb = QueryBuilder::new(format!("SELECT {ASSIGNMENT_COLUMNS} FROM role_assignments"));
        filter.push_where(&mut qb);
        let row = qb
            .build()
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_assignment", e))?;
        row.as_ref().map(assignment_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_assignments(
        &self,
        organization_id: OrganizationId,
        user_id: Option<UserId>,
    ) -> Result<Vec<RoleAssignment>, StoreError> {
        let filter = scope_filter(organization_id, user_id.map(|u| Condition::eq("user_id", u)));
        let mut qb = QueryBuilder::new(format!("SELECT {ASSIGNMENT_COLUMNS} FROM role_assignments"));
        filter.push_where(&mut qb);
        qb.push(" ORDER BY assigned_at DESC, id DESC");
        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_assignments", e))?;
        rows.iter().map(assignment_from_row).collect()
    }

    #[instrument(
        skip(self, assignment, audit),
        fields(
            organization_id = %assignment.organization_id,
            user_id = %assignment.user_id,
            role_id = %assignment.role_id
        ),
        err
    )]
    async fn insert_assignment(
        &self,
        assignment: RoleAssignment,
        now: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        let org = assignment.organization_id;
        let mut tx = self.begin().await?;
        ensure_active_role(&mut tx, org, assignment.role_id).await?;

        let same = scope_filter(
            org,
            [
                Condition::eq("user_id", assignment.user_id),
                Condition::eq("role_id", assignment.role_id),
                Condition::eq("is_active", true),
            ],
        );
        let mut qb = QueryBuilder::new(format!("SELECT {ASSIGNMENT_COLUMNS} FROM role_assignments"));
        same.push_where(&mut qb);
        qb.push(" FOR UPDATE");
        let rows = qb
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_assignments", e))?;
        for row in &rows {
            if assignment_from_row(row)?.lifecycle(now).is_live() {
                return Err(StoreError::Conflict("role already assigned".to_string()));
            }
        }

        if !rows.is_empty() {
            let mut qb = QueryBuilder::new("UPDATE role_assignments SET is_active = FALSE, revoked_at = ");
            qb.push_bind(now);
            same.push_where(&mut qb);
            qb.build()
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("supersede_assignment", e))?;
        }

        let values = scope_insert(
            org,
            RowValues::new()
                .set("id", assignment.id)
                .set("user_id", assignment.user_id)
                .set("role_id", assignment.role_id)
                .set("assigned_by", assignment.assigned_by)
                .set("assigned_at", assignment.assigned_at)
                .set("expires_at", assignment.expires_at)
                .set("is_active", true),
        );
        let mut qb = QueryBuilder::new("");
        values.push_insert("role_assignments", &mut qb);
        qb.build()
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_assignment", e))?;

        insert_audit(&mut tx, &audit).await?;
        commit(tx).await
    }

    #[instrument(skip(self, audit), err)]
    async fn revoke_assignment(
        &self,
        organization_id: OrganizationId,
        assignment_id: AssignmentId,
        revocation: Revocation,
        audit: AuditEntry,
    ) -> Result<RevokeOutcome, StoreError> {
        revoke_row(
            self,
            "role_assignments",
            "role assignment",
            organization_id,
            assignment_id.into(),
            revocation,
            audit,
        )
        .await
    }
}

/// Compare-and-set revoke shared by assignments and overrides: only a row
/// that is still live at `revocation.at` is touched, and only then is the
/// audit row written. Concurrent revokes therefore produce exactly one audit
/// entry.
async fn revoke_row(
    store: &PostgresAuthzStore,
    table: &'static str,
    entity: &'static str,
    organization_id: OrganizationId,
    id: Uuid,
    revocation: Revocation,
    audit: AuditEntry,
) -> Result<RevokeOutcome, StoreError> {
    let mut tx = store.begin().await?;

    let live = scope_filter(
        organization_id,
        [
            Condition::eq("id", id),
            Condition::eq("is_active", true),
            Condition::unexpired_at(revocation.at),
        ],
    );
    let mut qb = QueryBuilder::new(format!("UPDATE {table} SET is_active = FALSE, revoked_at = "));
    qb.push_bind(revocation.at)
        .push(", revoked_by = ")
        .push_bind(revocation.by.map(Uuid::from));
    live.push_where(&mut qb);
    let result = qb
        .build()
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("revoke", e))?;

    if result.rows_affected() == 0 {
        let exists = scope_filter(organization_id, [Condition::eq("id", id)]);
        let mut qb = QueryBuilder::new(format!("SELECT id FROM {table}"));
        exists.push_where(&mut qb);
        let row = qb
            .build()
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("revoke_lookup", e))?;
        return match row {
            Some(_) => Ok(RevokeOutcome::AlreadyInactive),
            None => Err(StoreError::NotFound(entity)),
        };
    }

    insert_audit(&mut tx, &audit).await?;
    commit(tx).await?;
    Ok(RevokeOutcome::Revoked)
}

// ─────────────────────────────────────────────────────────────────────────────
// Direct overrides
// ─────────────────────────────────────────────────────────────────────────────

impl PostgresAuthzStore {
    async fn fetch_overrides(
        &self,
        filter: ScopedFilter,
        order: &'static str,
    ) -> Result<Vec<OverrideEntry>, StoreError> {
        let mut qb = QueryBuilder::new("WITH o AS (SELECT * FROM permission_overrides");
        filter.push_where(&mut qb);
        qb.push(") SELECT o.*, p.slug AS permission_slug FROM o JOIN permissions p ON p.id = o.permission_id");
        qb.push(order);
        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_overrides", e))?;
        rows.iter()
            .map(|row| {
                Ok(OverrideEntry {
                    entry: override_from_row(row)?,
                    permission: slug_from(get(row, "permission_slug")?)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl OverrideStore for PostgresAuthzStore {
    #[instrument(skip(self), err)]
    async fn live_overrides(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<OverrideEntry>, StoreError> {
        let filter = scope_filter(
            organization_id,
            [
                Condition::eq("user_id", user_id),
                Condition::eq("is_active", true),
                Condition::unexpired_at(now),
            ],
        );
        self.fetch_overrides(filter, "").await
    }

    #[instrument(skip(self), err)]
    async fn get_override(
        &self,
        organization_id: OrganizationId,
        override_id: OverrideId,
    ) -> Result<Option<DirectOverride>, StoreError> {
        let filter = scope_filter(organization_id, [Condition::eq("id", override_id)]);
        let mut qb = QueryBuilder::new("SELECT * FROM permission_overrides");
        filter.push_where(&mut qb);
        let row = qb
            .build()
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_override", e))?;
        row.as_ref().map(override_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_overrides(
        &self,
        organization_id: OrganizationId,
        user_id: Option<UserId>,
    ) -> Result<Vec<OverrideEntry>, StoreError> {
        let filter = scope_filter(organization_id, user_id.map(|u| Condition::eq("user_id", u)));
        self.fetch_overrides(filter, " ORDER BY o.created_at DESC, o.id DESC").await
    }

    #[instrument(
        skip(self, entry, audit),
        fields(
            organization_id = %entry.organization_id,
            user_id = %entry.user_id,
            permission_id = %entry.permission_id
        ),
        err
    )]
    async fn insert_override(&self, entry: DirectOverride, audit: AuditEntry) -> Result<(), StoreError> {
        let org = entry.organization_id;
        let mut tx = self.begin().await?;

        let now = entry.created_at;
        let same = scope_filter(
            org,
            [
                Condition::eq("user_id", entry.user_id),
                Condition::eq("permission_id", entry.permission_id),
                Condition::eq("is_active", true),
            ],
        );
        let mut qb = QueryBuilder::new(format!("SELECT {OVERRIDE_COLUMNS} FROM permission_overrides"));
        same.push_where(&mut qb);
        qb.push(" FOR UPDATE");
        let rows = qb
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_overrides", e))?;
        for row in &rows {
            if override_from_row(row)?.lifecycle(now).is_live() {
                return Err(StoreError::Conflict(
                    "a live override already exists for this permission".to_string(),
                ));
            }
        }

        // Expired leftovers would trip permission_overrides_one_active.
        if !rows.is_empty() {
            let mut qb = QueryBuilder::new("UPDATE permission_overrides SET is_active = FALSE, revoked_at = ");
            qb.push_bind(now);
            same.push_where(&mut qb);
            qb.build()
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("supersede_override", e))?;
        }

        let values = scope_insert(
            org,
            RowValues::new()
                .set("id", entry.id)
                .set("user_id", entry.user_id)
                .set("permission_id", entry.permission_id)
                .set("granted", entry.granted())
                .set("reason", entry.reason.clone())
                .set("created_by", entry.created_by)
                .set("created_at", entry.created_at)
                .set("expires_at", entry.expires_at)
                .set("is_active", true),
        );
        let mut qb = QueryBuilder::new("");
        values.push_insert("permission_overrides", &mut qb);
        qb.build()
            .execute(&mut *tx)
            .await
            .map_err(|e| match map_sqlx_error("insert_override", e) {
                StoreError::NotFound(_) => StoreError::NotFound("permission"),
                other => other,
            })?;

        insert_audit(&mut tx, &audit).await?;
        commit(tx).await
    }

    #[instrument(skip(self, audit), err)]
    async fn revoke_override(
        &self,
        organization_id: OrganizationId,
        override_id: OverrideId,
        revocation: Revocation,
        audit: AuditEntry,
    ) -> Result<RevokeOutcome, StoreError> {
        revoke_row(
            self,
            "permission_overrides",
            "direct override",
            organization_id,
            override_id.into(),
            revocation,
            audit,
        )
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit log
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl AuditLog for PostgresAuthzStore {
    #[instrument(skip(self, entry), fields(action = %entry.action), err)]
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        insert_audit(&mut tx, &entry).await?;
        tx.commit().await.map_err(|e| StoreError::AuditWrite(e.to_string()))
    }

    #[instrument(skip(self), err)]
    async fn list_audit(
        &self,
        organization_id: Option<OrganizationId>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let mut qb = QueryBuilder::new(format!("SELECT {AUDIT_COLUMNS} FROM audit_log"));
        match organization_id {
            Some(org) => scope_filter(org, []).push_where(&mut qb),
            None => {
                qb.push(" WHERE organization_id IS NULL");
            }
        }
        qb.push(" ORDER BY recorded_at DESC, id DESC LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_audit", e))?;
        rows.iter().map(audit_from_row).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("column {column}: {e}")))
}

fn slug_from(raw: String) -> Result<PermissionSlug, StoreError> {
    PermissionSlug::parse(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn revocation_from_row(row: &PgRow, fallback_at: DateTime<Utc>) -> Result<Option<Revocation>, StoreError> {
    if get::<bool>(row, "is_active")? {
        return Ok(None);
    }
    Ok(Some(Revocation {
        at: get::<Option<DateTime<Utc>>>(row, "revoked_at")?.unwrap_or(fallback_at),
        by: get::<Option<Uuid>>(row, "revoked_by")?.map(UserId::from_uuid),
    }))
}

fn user_from_row(row: &PgRow) -> Result<UserAccount, StoreError> {
    Ok(UserAccount {
        id: UserId::from_uuid(get(row, "id")?),
        email: get(row, "email")?,
        is_super_admin: get(row, "is_super_admin")?,
        current_organization_id: get::<Option<Uuid>>(row, "current_organization_id")?.map(OrganizationId::from_uuid),
        created_at: get(row, "created_at")?,
    })
}

fn organization_from_row(row: &PgRow) -> Result<Organization, StoreError> {
    Ok(Organization {
        id: OrganizationId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        parent_id: get::<Option<Uuid>>(row, "parent_id")?.map(OrganizationId::from_uuid),
        is_active: get(row, "is_active")?,
        created_at: get(row, "created_at")?,
    })
}

fn membership_from_row(row: &PgRow) -> Result<Membership, StoreError> {
    Ok(Membership {
        user_id: UserId::from_uuid(get(row, "user_id")?),
        organization_id: OrganizationId::from_uuid(get(row, "organization_id")?),
        is_active: get(row, "is_active")?,
        is_primary: get(row, "is_primary")?,
        joined_at: get(row, "joined_at")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, StoreError> {
    Ok(Permission {
        id: PermissionId::from_uuid(get(row, "id")?),
        slug: slug_from(get(row, "slug")?)?,
        description: get(row, "description")?,
        created_at: get(row, "created_at")?,
    })
}

/// `prefix` selects aliased columns from joins (`role_slug`, ...). The id
/// of a joined role is read from `role_id_`.
fn role_from_row(row: &PgRow, prefix: &str) -> Result<Role, StoreError> {
    let col = |name: &str| format!("{prefix}{name}");
    let id_column = if prefix.is_empty() { "id".to_string() } else { col("id_") };
    Ok(Role {
        id: RoleId::from_uuid(get(row, &id_column)?),
        organization_id: OrganizationId::from_uuid(get(row, &col("organization_id"))?),
        slug: get(row, &col("slug"))?,
        name: get(row, &col("name"))?,
        description: get(row, &col("description"))?,
        is_system: get(row, &col("is_system"))?,
        is_active: get(row, &col("is_active"))?,
        created_at: get(row, &col("created_at"))?,
        updated_at: get(row, &col("updated_at"))?,
    })
}

fn assignment_from_row(row: &PgRow) -> Result<RoleAssignment, StoreError> {
    let assigned_at: DateTime<Utc> = get(row, "assigned_at")?;
    Ok(RoleAssignment {
        id: AssignmentId::from_uuid(get(row, "id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        role_id: RoleId::from_uuid(get(row, "role_id")?),
        organization_id: OrganizationId::from_uuid(get(row, "organization_id")?),
        assigned_by: get::<Option<Uuid>>(row, "assigned_by")?.map(UserId::from_uuid),
        assigned_at,
        expires_at: get(row, "expires_at")?,
        revocation: revocation_from_row(row, assigned_at)?,
    })
}

fn override_from_row(row: &PgRow) -> Result<DirectOverride, StoreError> {
    let created_at: DateTime<Utc> = get(row, "created_at")?;
    Ok(DirectOverride {
        id: OverrideId::from_uuid(get(row, "id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        permission_id: PermissionId::from_uuid(get(row, "permission_id")?),
        organization_id: OrganizationId::from_uuid(get(row, "organization_id")?),
        effect: OverrideEffect::from_granted(get(row, "granted")?),
        reason: get(row, "reason")?,
        created_by: get::<Option<Uuid>>(row, "created_by")?.map(UserId::from_uuid),
        created_at,
        expires_at: get(row, "expires_at")?,
        revocation: revocation_from_row(row, created_at)?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditEntry, StoreError> {
    let action: String = get(row, "action")?;
    let entity_type: String = get(row, "entity_type")?;
    Ok(AuditEntry {
        id: docket_core::AuditEntryId::from_uuid(get(row, "id")?),
        organization_id: get::<Option<Uuid>>(row, "organization_id")?.map(OrganizationId::from_uuid),
        actor: get::<Option<Uuid>>(row, "actor_id")?.map(UserId::from_uuid),
        action: AuditAction::parse(&action)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown audit action '{action}'")))?,
        entity_type: AuditEntity::parse(&entity_type)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown audit entity '{entity_type}'")))?,
        entity_id: get(row, "entity_id")?,
        description: get(row, "description")?,
        metadata: get(row, "metadata")?,
        recorded_at: get(row, "recorded_at")?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping
// ─────────────────────────────────────────────────────────────────────────────

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound("referenced row"),
                _ => {
                    tracing::error!(operation, error = %msg, "database error");
                    StoreError::Unavailable(msg)
                }
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {}", operation)),
        _ => {
            tracing::warn!(operation, error = %err, "sqlx error");
            StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err))
        }
    }
}
