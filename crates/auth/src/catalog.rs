//! The closed permission catalog and the system role templates seeded into
//! every organization.

use crate::PermissionSlug;

macro_rules! slugs {
    ($($name:ident = $slug:literal, $desc:literal;)+) => {
        $(pub const $name: PermissionSlug = PermissionSlug::from_static($slug);)+

        /// Every permission in the catalog with its description.
        pub fn default_catalog() -> Vec<(PermissionSlug, &'static str)> {
            vec![$(($name, $desc)),+]
        }
    };
}

slugs! {
    CASES_CREATE = "cases:create", "Open new cases";
    CASES_READ = "cases:read", "View cases";
    CASES_UPDATE = "cases:update", "Edit case details";
    CASES_DELETE = "cases:delete", "Delete cases";
    HEARINGS_CREATE = "hearings:create", "Schedule hearings";
    HEARINGS_READ = "hearings:read", "View all hearings";
    HEARINGS_READ_OWN = "hearings:read-own", "View hearings the user is assigned to";
    HEARINGS_UPDATE = "hearings:update", "Reschedule or edit hearings";
    HEARINGS_DELETE = "hearings:delete", "Cancel hearings";
    EVIDENCE_CREATE = "evidence:create", "Submit evidence";
    EVIDENCE_READ = "evidence:read", "View evidence";
    EVIDENCE_UPDATE = "evidence:update", "Edit evidence metadata";
    EVIDENCE_DELETE = "evidence:delete", "Remove evidence";
    DOCUMENTS_CREATE = "documents:create", "Upload documents";
    DOCUMENTS_READ = "documents:read", "View documents";
    DOCUMENTS_DELETE = "documents:delete", "Remove documents";
    ROLES_CREATE = "roles:create", "Create custom roles";
    ROLES_READ = "roles:read", "View roles and their permissions";
    ROLES_UPDATE = "roles:update", "Edit custom roles";
    ROLES_DELETE = "roles:delete", "Delete custom roles";
    ROLES_ASSIGN = "roles:assign", "Assign and revoke roles";
    PERMISSIONS_GRANT = "permissions:grant", "Grant or deny individual permissions";
    MEMBERS_READ = "members:read", "View organization members";
    MEMBERS_INVITE = "members:invite", "Invite members";
    MEMBERS_REMOVE = "members:remove", "Remove members";
    ORGANIZATIONS_READ = "organizations:read", "View organization settings";
    ORGANIZATIONS_UPDATE = "organizations:update", "Edit organization settings";
    AUDIT_READ = "audit:read", "View the audit log";
}

/// A system role installed into each organization. System roles cannot be
/// edited or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTemplate {
    pub slug: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: Vec<PermissionSlug>,
}

/// System roles seeded into a new organization.
pub fn system_role_templates() -> Vec<RoleTemplate> {
    let everything: Vec<PermissionSlug> = default_catalog().into_iter().map(|(slug, _)| slug).collect();

    vec![
        RoleTemplate {
            slug: "owner",
            name: "Owner",
            description: "Full control of the organization",
            permissions: everything.clone(),
        },
        RoleTemplate {
            slug: "admin",
            name: "Administrator",
            description: "Manages members, roles and case data",
            permissions: everything
                .iter()
                .filter(|p| p.resource() != "organizations" || p.action() == "read")
                .cloned()
                .collect(),
        },
        RoleTemplate {
            slug: "judge",
            name: "Judge",
            description: "Presides over cases and hearings",
            permissions: vec![
                CASES_READ,
                CASES_UPDATE,
                HEARINGS_CREATE,
                HEARINGS_READ,
                HEARINGS_UPDATE,
                EVIDENCE_READ,
                DOCUMENTS_READ,
                MEMBERS_READ,
            ],
        },
        RoleTemplate {
            slug: "clerk",
            name: "Clerk",
            description: "Handles filings, scheduling and evidence intake",
            permissions: vec![
                CASES_CREATE,
                CASES_READ,
                CASES_UPDATE,
                HEARINGS_CREATE,
                HEARINGS_READ,
                HEARINGS_UPDATE,
                EVIDENCE_CREATE,
                EVIDENCE_READ,
                DOCUMENTS_CREATE,
                DOCUMENTS_READ,
            ],
        },
        RoleTemplate {
            slug: "viewer",
            name: "Viewer",
            description: "Read-only access to case data",
            permissions: vec![CASES_READ, HEARINGS_READ_OWN, EVIDENCE_READ, DOCUMENTS_READ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn catalog_slugs_are_unique_and_valid() {
        let catalog = default_catalog();
        let unique: HashSet<&str> = catalog.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(unique.len(), catalog.len());
        for (slug, _) in &catalog {
            assert_eq!(&PermissionSlug::parse(slug.as_str().to_string()).unwrap(), slug);
        }
    }

    #[test]
    fn templates_only_reference_catalog_permissions() {
        let catalog: HashSet<PermissionSlug> = default_catalog().into_iter().map(|(s, _)| s).collect();
        for template in system_role_templates() {
            for perm in &template.permissions {
                assert!(catalog.contains(perm), "{} references unknown {}", template.slug, perm);
            }
        }
    }

    #[test]
    fn admin_cannot_edit_organization_settings() {
        let admin = system_role_templates().into_iter().find(|t| t.slug == "admin").unwrap();
        assert!(admin.permissions.contains(&ORGANIZATIONS_READ));
        assert!(!admin.permissions.contains(&ORGANIZATIONS_UPDATE));
        assert!(admin.permissions.contains(&ROLES_ASSIGN));
    }
}
