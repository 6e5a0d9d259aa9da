//! Async authorization services over an [`AuthzStore`](crate::store::AuthzStore).
//!
//! - [`PermissionResolver`]: effective permission sets, fresh on every call.
//! - [`AccessGate`]: boolean checks and `require*` helpers per request context.
//! - [`TenantContextResolver`]: which organization a request acts in.
//! - [`RbacAdmin`]: gated, audited role and override administration.

mod admin;
mod gate;
mod resolver;
mod tenancy;


pub use admin::{NewRole, OverrideRequest, RbacAdmin, RoleDetails};
pub use gate::AccessGate;
pub use resolver::PermissionResolver;
pub use tenancy::{Switch, TenantContextResolver};
