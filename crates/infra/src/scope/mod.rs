//! Org-scope filter: the single choke point that injects the tenant
//! boundary into every read and write of organization-scoped data.
//!
//! A [`ScopedFilter`] can only be built by [`scope_filter`] (which always
//! conjoins `organization_id = <org>`) or by [`ScopedFilter::cross_tenant`]
//! (super admins only). Storage adapters accept nothing else, so a query
//! without the tenant predicate does not type-check. The same conditions are
//! evaluated in memory ([`ScopedFilter::matches`]) and rendered into SQL
//! ([`ScopedFilter::push_where`]).
//!
//! Column names are `&'static str` and come from code, never from callers.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use docket_auth::TenantContext;
use docket_core::OrganizationId;

use crate::error::AccessError;

mod rows;
mod table;

pub use table::ScopedTable;

/// Tenant column carried by every organization-scoped table.
pub const ORGANIZATION_COLUMN: &str = "organization_id";

// ─────────────────────────────────────────────────────────────────────────────
// Values and conditions
// ─────────────────────────────────────────────────────────────────────────────

/// A column value as seen by filters and inserts.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeValue {
    Null,
    Uuid(Uuid),
    Text(String),
    Bool(bool),
    Int(i64),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl ScopeValue {
    /// SQL-style comparison: `None` when either side is `NULL` or the kinds
    /// differ, which makes the enclosing condition false.
    fn compare(&self, other: &ScopeValue) -> Option<Ordering> {
        match (self, other) {
            (ScopeValue::Uuid(a), ScopeValue::Uuid(b)) => Some(a.cmp(b)),
            (ScopeValue::Text(a), ScopeValue::Text(b)) => Some(a.cmp(b)),
            (ScopeValue::Bool(a), ScopeValue::Bool(b)) => Some(a.cmp(b)),
            (ScopeValue::Int(a), ScopeValue::Int(b)) => Some(a.cmp(b)),
            (ScopeValue::Timestamp(a), ScopeValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn push_bind(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            ScopeValue::Null => {
                qb.push("NULL");
            }
            ScopeValue::Uuid(v) => {
                qb.push_bind(*v);
            }
            ScopeValue::Text(v) => {
                qb.push_bind(v.clone());
            }
            ScopeValue::Bool(v) => {
                qb.push_bind(*v);
            }
            ScopeValue::Int(v) => {
                qb.push_bind(*v);
            }
            ScopeValue::Timestamp(v) => {
                qb.push_bind(*v);
            }
            ScopeValue::Json(v) => {
                qb.push_bind(v.clone());
            }
        }
    }
}

macro_rules! scope_value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(impl From<$ty> for ScopeValue {
            fn from(v: $ty) -> Self {
                ScopeValue::$variant(v.into())
            }
        })+
    };
}

scope_value_from!(
    Uuid => Uuid,
    String => Text,
    &str => Text,
    bool => Bool,
    i64 => Int,
    DateTime<Utc> => Timestamp,
    serde_json::Value => Json,
);

macro_rules! scope_value_from_id {
    ($($id:ty),+ $(,)?) => {
        $(impl From<$id> for ScopeValue {
            fn from(id: $id) -> Self {
                ScopeValue::Uuid(id.into())
            }
        })+
    };
}

scope_value_from_id!(
    docket_core::OrganizationId,
    docket_core::UserId,
    docket_core::RoleId,
    docket_core::PermissionId,
    docket_core::AssignmentId,
    docket_core::OverrideId,
    docket_core::AuditEntryId,
);

impl<T: Into<ScopeValue>> From<Option<T>> for ScopeValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ScopeValue::Null, Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => " = ",
            Op::Ne => " <> ",
            Op::Lt => " < ",
            Op::Le => " <= ",
            Op::Gt => " > ",
            Op::Ge => " >= ",
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            Op::Eq => ord == Ordering::Equal,
            Op::Ne => ord != Ordering::Equal,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
        }
    }
}

/// One predicate of a filter. Conditions in a filter are conjoined.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: &'static str,
        op: Op,
        value: ScopeValue,
    },
    IsNull(&'static str),
    IsNotNull(&'static str),
    /// Disjunction of the inner conditions; empty is false.
    Any(Vec<Condition>),
}

impl Condition {
    pub fn eq(column: &'static str, value: impl Into<ScopeValue>) -> Self {
        Self::compare(column, Op::Eq, value)
    }

    pub fn ne(column: &'static str, value: impl Into<ScopeValue>) -> Self {
        Self::compare(column, Op::Ne, value)
    }

    pub fn gt(column: &'static str, value: impl Into<ScopeValue>) -> Self {
        Self::compare(column, Op::Gt, value)
    }

    pub fn lt(column: &'static str, value: impl Into<ScopeValue>) -> Self {
        Self::compare(column, Op::Lt, value)
    }

    pub fn compare(column: &'static str, op: Op, value: impl Into<ScopeValue>) -> Self {
        Condition::Compare {
            column,
            op,
            value: value.into(),
        }
    }

    /// `expires_at IS NULL OR expires_at > now`: the live-at-`now` expiry
    /// rule for assignments and overrides.
    pub fn unexpired_at(now: DateTime<Utc>) -> Self {
        Condition::Any(vec![Condition::IsNull("expires_at"), Condition::gt("expires_at", now)])
    }

    pub fn matches<R: Columns + ?Sized>(&self, row: &R) -> bool {
        match self {
            Condition::Compare { column, op, value } => row
                .column(column)
                .and_then(|actual| actual.compare(value))
                .is_some_and(|ord| op.holds(ord)),
            Condition::IsNull(column) => matches!(row.column(column), Some(ScopeValue::Null)),
            Condition::IsNotNull(column) => matches!(row.column(column), Some(v) if v != ScopeValue::Null),
            Condition::Any(inner) => inner.iter().any(|c| c.matches(row)),
        }
    }

    fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Condition::Compare { column, op, value } => {
                qb.push(*column).push(op.as_sql());
                value.push_bind(qb);
            }
            Condition::IsNull(column) => {
                qb.push(*column).push(" IS NULL");
            }
            Condition::IsNotNull(column) => {
                qb.push(*column).push(" IS NOT NULL");
            }
            Condition::Any(inner) if inner.is_empty() => {
                qb.push("FALSE");
            }
            Condition::Any(inner) => {
                qb.push("(");
                for (i, c) in inner.iter().enumerate() {
                    if i > 0 {
                        qb.push(" OR ");
                    }
                    c.push_sql(qb);
                }
                qb.push(")");
            }
        }
    }
}

/// Column access for in-memory evaluation. Unknown columns return `None`,
/// which fails every condition on them.
pub trait Columns {
    fn column(&self, name: &str) -> Option<ScopeValue>;
}

/// A row that belongs to exactly one organization.
pub trait OrgScoped {
    fn organization_id(&self) -> OrganizationId;
    fn set_organization_id(&mut self, organization_id: OrganizationId);
}

// ─────────────────────────────────────────────────────────────────────────────
// Filters
// ─────────────────────────────────────────────────────────────────────────────

/// A tenant-bounded filter. See the module docs for how one is obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedFilter {
    organization_id: Option<OrganizationId>,
    conditions: Vec<Condition>,
}

/// `base ∧ organization_id = org`.
///
/// A caller-supplied `organization_id` condition in `base` is kept and
/// conjoined, so it can only narrow the result (to nothing, if it names a
/// different organization), never widen it.
pub fn scope_filter(organization_id: OrganizationId, base: impl IntoIterator<Item = Condition>) -> ScopedFilter {
    let mut conditions = vec![Condition::eq(ORGANIZATION_COLUMN, organization_id)];
    conditions.extend(base);
    ScopedFilter {
        organization_id: Some(organization_id),
        conditions,
    }
}

impl ScopedFilter {
    /// Unbounded filter for super-admin management views. Returns `None` for
    /// anyone else.
    pub fn cross_tenant(ctx: &TenantContext, base: impl IntoIterator<Item = Condition>) -> Option<Self> {
        ctx.is_super_admin().then(|| ScopedFilter {
            organization_id: None,
            conditions: base.into_iter().collect(),
        })
    }

    /// Conjoin one more condition.
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// `None` only for a cross-tenant filter.
    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches<R: Columns + ?Sized>(&self, row: &R) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }

    /// Append ` WHERE c1 AND c2 ...` (nothing for an empty cross-tenant
    /// filter) with every value bound as a parameter.
    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        for (i, c) in self.conditions.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            c.push_sql(qb);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inserts
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered column/value pairs for one insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowValues {
    columns: Vec<(&'static str, ScopeValue)>,
}

impl RowValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `column`, replacing an earlier value for it.
    pub fn set(mut self, column: &'static str, value: impl Into<ScopeValue>) -> Self {
        let value = value.into();
        match self.columns.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&ScopeValue> {
        self.columns.iter().find(|(c, _)| *c == column).map(|(_, v)| v)
    }

    /// `INSERT INTO <table> (cols) VALUES ($1, ...)`.
    pub fn push_insert(&self, table: &'static str, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push("INSERT INTO ").push(table).push(" (");
        for (i, (column, _)) in self.columns.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(*column);
        }
        qb.push(") VALUES (");
        for (i, (_, value)) in self.columns.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            value.push_bind(qb);
        }
        qb.push(")");
    }
}

impl Columns for RowValues {
    fn column(&self, name: &str) -> Option<ScopeValue> {
        self.get(name).cloned()
    }
}

/// Stamp `organization_id = org` onto an insert, replacing whatever the
/// caller put there.
pub fn scope_insert(organization_id: OrganizationId, values: RowValues) -> RowValues {
    values.set(ORGANIZATION_COLUMN, organization_id)
}

/// Typed counterpart of [`scope_insert`] for in-memory rows.
pub fn scope_row<T: OrgScoped>(organization_id: OrganizationId, mut row: T) -> T {
    row.set_organization_id(organization_id);
    row
}

/// Post-fetch guard for by-id lookups: a row from another organization is
/// indistinguishable from a missing one.
pub fn validate_org_access<T: OrgScoped>(
    organization_id: OrganizationId,
    row: Option<T>,
    entity: &'static str,
) -> Result<T, AccessError> {
    match row {
        Some(row) if row.organization_id() == organization_id => Ok(row),
        _ => Err(AccessError::not_found(entity)),
    }
}
