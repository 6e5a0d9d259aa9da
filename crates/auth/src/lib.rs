//! `docket-auth`: the pure authorization and tenant-isolation domain.
//!
//! Everything here is deterministic and free of IO: storage adapters fetch
//! rows, this crate decides what they mean. It is intentionally decoupled
//! from HTTP and storage.

pub mod audit;
pub mod catalog;
pub mod claims;
pub mod context;
pub mod explain;
pub mod grants;
pub mod lifecycle;
pub mod permissions;
pub mod resolve;
pub mod roles;
pub mod tenancy;

pub use audit::{AuditAction, AuditEntity, AuditEntry};
pub use catalog::{RoleTemplate, default_catalog, system_role_templates};
pub use claims::{CLOCK_SKEW_SECS, Hs256JwtValidator, JwtClaims, JwtValidator, MAX_TOKEN_LIFETIME_HOURS, TokenValidationError};
pub use context::TenantContext;
pub use explain::{AuthorizationExplanation, DecisionSource, DenialKind, DenialReason, explain};
pub use grants::{DirectOverride, OverrideEffect, RevokeOutcome, RoleAssignment};
pub use lifecycle::{Lifecycle, Revocation};
pub use permissions::{Permission, PermissionSlug};
pub use resolve::{
    EffectivePermissionSet, HeldRole, OverrideEntry, PermissionSources, ResolverRows, RoleGrantedPermission,
    SUPER_ADMIN_ROLE,
};
pub use roles::{Role, RoleChanges, validate_role_slug};
pub use tenancy::{Membership, Organization, UserAccount, select_organization};
