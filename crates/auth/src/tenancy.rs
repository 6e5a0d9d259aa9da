//! Identity and tenant directory records, and the pure rule that picks the
//! organization a user is currently acting in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docket_core::{OrganizationId, UserId};

/// A user account as seen by the authorization core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub email: String,
    /// Global, not organization-scoped.
    pub is_super_admin: bool,
    /// Persisted input to context resolution; only ever set through an
    /// organization switch, which verifies membership.
    pub current_organization_id: Option<OrganizationId>,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            email: email.into().trim().to_lowercase(),
            is_super_admin: false,
            current_organization_id: None,
            created_at: now,
        }
    }
}

/// A tenant. Lifecycle beyond the active flag is owned by tenant
/// administration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Stored only; the hierarchy is not used for access decisions.
    pub parent_id: Option<OrganizationId>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>, parent_id: Option<OrganizationId>, now: DateTime<Utc>) -> Self {
        Self {
            id: OrganizationId::new(),
            name: name.into(),
            parent_id,
            is_active: true,
            created_at: now,
        }
    }
}

/// A user's membership in an organization. Deactivated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub is_active: bool,
    pub is_primary: bool,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(user_id: UserId, organization_id: OrganizationId, is_primary: bool, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            organization_id,
            is_active: true,
            is_primary,
            joined_at: now,
        }
    }
}

/// Pick the organization `user` is acting in. First match wins:
///
/// 1. the explicit current-organization pointer,
/// 2. the active primary membership,
/// 3. the earliest-joined active membership (ties broken by organization id),
/// 4. none.
pub fn select_organization(user: &UserAccount, memberships: &[Membership]) -> Option<OrganizationId> {
    if let Some(current) = user.current_organization_id {
        return Some(current);
    }

    let active = memberships
        .iter()
        .filter(|m| m.user_id == user.id && m.is_active);

    if let Some(primary) = active.clone().filter(|m| m.is_primary).min_by_key(|m| (m.joined_at, m.organization_id)) {
        return Some(primary.organization_id);
    }

    active
        .min_by_key(|m| (m.joined_at, m.organization_id))
        .map(|m| m.organization_id)
}
