use docket_core::UserId;

pub use docket_auth::TenantContext;

/// Authenticated caller, taken from a verified bearer token.
///
/// Present on every authenticated route; [`TenantContext`] is added on top
/// for organization-scoped routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Principal {
    user_id: UserId,
}

impl Principal {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
