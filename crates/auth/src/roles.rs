use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docket_core::{DomainError, OrganizationId, RoleId};

/// An organization-scoped, named bundle of permissions.
///
/// # Invariants
/// - A role belongs to exactly one organization; roles are never shared
///   across tenants.
/// - `slug` is unique among the organization's roles.
/// - System roles cannot be edited or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub organization_id: OrganizationId,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    /// Soft-delete flag.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(
        organization_id: OrganizationId,
        slug: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        is_system: bool,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let slug = slug.into();
        validate_role_slug(&slug)?;
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        Ok(Self {
            id: RoleId::new(),
            organization_id,
            slug,
            name,
            description,
            is_system,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Reject edits and deletes of system roles.
    pub fn ensure_mutable(&self) -> Result<(), DomainError> {
        if self.is_system {
            return Err(DomainError::conflict(format!(
                "role '{}' is a system role and cannot be modified",
                self.slug
            )));
        }
        Ok(())
    }
}

/// Role slugs are lowercase identifiers (`clerk`, `senior-clerk`).
pub fn validate_role_slug(slug: &str) -> Result<(), DomainError> {
    if slug.is_empty() || slug.len() > 64 {
        return Err(DomainError::validation("role slug must be 1-64 characters"));
    }
    if !slug
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
    {
        return Err(DomainError::validation(format!(
            "role slug '{slug}' may only contain lowercase letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

/// Editable fields of a custom role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChanges {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl RoleChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }

    /// Apply to `role`, validating the result.
    pub fn apply(&self, role: &mut Role, now: DateTime<Utc>) -> Result<(), DomainError> {
        role.ensure_mutable()?;
        if let Some(name) = &self.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(DomainError::validation("role name cannot be empty"));
            }
            role.name = name.to_string();
        }
        if let Some(description) = &self.description {
            role.description = Some(description.clone());
        }
        role.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_roles_are_immutable() {
        let mut role = Role::new(OrganizationId::new(), "owner", "Owner", None, true, Utc::now()).unwrap();
        let changes = RoleChanges {
            name: Some("Boss".to_string()),
            description: None,
        };
        let err = changes.apply(&mut role, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(role.name, "Owner");
    }

    #[test]
    fn custom_role_changes_apply() {
        let mut role = Role::new(OrganizationId::new(), "intake", "Intake", None, false, Utc::now()).unwrap();
        let changes = RoleChanges {
            name: Some("  Intake desk ".to_string()),
            description: Some("Front desk".to_string()),
        };
        changes.apply(&mut role, Utc::now()).unwrap();
        assert_eq!(role.name, "Intake desk");
        assert_eq!(role.description.as_deref(), Some("Front desk"));
    }

    #[test]
    fn role_slug_validation() {
        assert!(validate_role_slug("senior-clerk").is_ok());
        assert!(validate_role_slug("Senior Clerk").is_err());
        assert!(validate_role_slug("").is_err());
    }
}
