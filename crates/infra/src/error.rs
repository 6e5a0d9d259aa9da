//! Error taxonomy for storage adapters and authorization services.

use thiserror::Error;

use docket_core::DomainError;

/// Storage adapter error.
///
/// These are **infrastructure errors** (persistence, isolation, atomicity) as
/// opposed to domain errors (validation, invariants).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The audit entry could not be written; the paired mutation was rolled
    /// back.
    #[error("audit write failed: {0}")]
    AuditWrite(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Error returned by authorization-dependent operations.
///
/// Cross-tenant reads surface as [`AccessError::NotFound`], never as a
/// permission error, so callers cannot discover another organization's ids.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("no tenant context")]
    NoTenantContext,

    #[error("missing permission: {permission}")]
    PermissionDenied { permission: String },

    #[error("{entity} not found")]
    NotFound { entity: String },

    #[error("not a member of the target organization")]
    NotAMember,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("audit write failed: {0}")]
    AuditWriteFailure(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl AccessError {
    pub fn denied(permission: impl Into<String>) -> Self {
        Self::PermissionDenied {
            permission: permission.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound { entity: entity.into() }
    }
}

impl From<StoreError> for AccessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity) => AccessError::not_found(entity),
            StoreError::Conflict(msg) => AccessError::Conflict(msg),
            StoreError::AuditWrite(msg) => AccessError::AuditWriteFailure(msg),
            StoreError::Corrupt(msg) | StoreError::Unavailable(msg) => AccessError::Storage(msg),
        }
    }
}

impl From<DomainError> for AccessError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => AccessError::Validation(msg),
            DomainError::InvariantViolation(msg) | DomainError::Conflict(msg) => AccessError::Conflict(msg),
            DomainError::NotFound(entity) => AccessError::NotFound { entity },
            DomainError::Unauthorized => AccessError::Unauthenticated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_failures_stay_distinguishable() {
        let err: AccessError = StoreError::AuditWrite("disk full".into()).into();
        assert_eq!(err, AccessError::AuditWriteFailure("disk full".into()));
    }

    #[test]
    fn domain_errors_map_to_access_errors() {
        assert!(matches!(
            AccessError::from(DomainError::validation("bad slug")),
            AccessError::Validation(_)
        ));
        assert!(matches!(
            AccessError::from(DomainError::conflict("system role")),
            AccessError::Conflict(_)
        ));
        assert_eq!(
            AccessError::from(DomainError::not_found("role")),
            AccessError::not_found("role")
        );
    }
}
