//! Storage boundary for identities, tenants, roles, grants and the audit
//! trail.
//!
//! Two backends implement the same traits: [`InMemoryAuthzStore`] for
//! tests/dev and [`PostgresAuthzStore`] for production. Both route
//! organization-scoped access through [`crate::scope`].

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryAuthzStore;
pub use postgres::PostgresAuthzStore;
pub use r#trait::{AuditLog, AuthzStore, IdentityStore, OverrideStore, PermissionCatalog, RoleStore, TenantDirectory};
