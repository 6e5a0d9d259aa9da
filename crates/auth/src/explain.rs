// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation
// ─────────────────────────────────────────────────────────────────────────────

use serde::Serialize;

use crate::EffectivePermissionSet;

/// What decided the outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    SuperAdmin,
    Role,
    DirectGrant,
    ExplicitDeny,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    ExplicitDeny,
    MissingPermission,
}

/// Detailed reason why authorization was denied.
#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

/// Detailed explanation of an authorization decision.
///
/// Answers "why was this request allowed/denied?" for admin tooling. The
/// decision itself always comes from [`EffectivePermissionSet::has_permission`].
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_permission: String,
    pub granted: bool,
    pub decided_by: DecisionSource,
    pub reason: String,
    /// Live roles that carry the permission (even if a deny removed it).
    pub granting_roles: Vec<String>,
    pub roles: Vec<String>,
    pub effective_permissions: Vec<String>,
    pub denial_reason: Option<DenialReason>,
}

/// Explain why `required` is (or is not) in `set`.
pub fn explain(set: &EffectivePermissionSet, required: &str) -> AuthorizationExplanation {
    let roles: Vec<String> = set.role_slugs().iter().cloned().collect();
    let effective_permissions: Vec<String> = set
        .permission_slugs()
        .iter()
        .map(|p| p.as_str().to_string())
        .collect();
    let granted = set.has_permission(required);
    let sources = set.sources(required);
    let granting_roles: Vec<String> = sources
        .map(|s| s.roles.iter().cloned().collect())
        .unwrap_or_default();

    let (decided_by, reason, denial_reason) = if set.is_super_admin() {
        (
            DecisionSource::SuperAdmin,
            "Principal is a super admin; organization-scoped resolution is bypassed".to_string(),
            None,
        )
    } else if let Some(src) = sources.filter(|s| s.denied) {
        let mut overridden = Vec::new();
        if !src.roles.is_empty() {
            overridden.push(format!("roles {:?}", granting_roles));
        }
        if src.granted {
            overridden.push("a direct grant".to_string());
        }
        let message = if overridden.is_empty() {
            format!("Permission '{required}' is explicitly denied")
        } else {
            format!(
                "Permission '{required}' is explicitly denied, overriding {}",
                overridden.join(" and ")
            )
        };
        (
            DecisionSource::ExplicitDeny,
            message.clone(),
            Some(DenialReason {
                kind: DenialKind::ExplicitDeny,
                message,
                suggestions: vec![format!(
                    "Revoke the deny override for '{required}' if access should be restored"
                )],
            }),
        )
    } else if granted && !granting_roles.is_empty() {
        (
            DecisionSource::Role,
            format!("Permission '{required}' is granted by roles {:?}", granting_roles),
            None,
        )
    } else if granted {
        (
            DecisionSource::DirectGrant,
            format!("Permission '{required}' is granted directly to the principal"),
            None,
        )
    } else {
        (
            DecisionSource::Missing,
            format!(
                "Principal does not have permission '{required}'. Current permissions: {:?}",
                effective_permissions
            ),
            Some(DenialReason {
                kind: DenialKind::MissingPermission,
                message: format!("Missing required permission: '{required}'"),
                suggestions: vec![
                    format!("Assign a role that grants the '{required}' permission"),
                    format!("Grant the '{required}' permission directly to the principal"),
                ],
            }),
        )
    };

    AuthorizationExplanation {
        required_permission: required.to_string(),
        granted,
        decided_by,
        reason,
        granting_roles,
        roles,
        effective_permissions,
        denial_reason,
    }
}
