//! Infrastructure layer: storage backends, the org-scope filter, the async
//! authorization services and configuration.

pub mod config;
pub mod error;
pub mod scope;
pub mod services;
pub mod store;

pub use error::{AccessError, StoreError};
pub use services::{AccessGate, PermissionResolver, RbacAdmin, Switch, TenantContextResolver};
pub use store::{AuthzStore, InMemoryAuthzStore, PostgresAuthzStore};
