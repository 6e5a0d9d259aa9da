//! Read-time lifecycle of role assignments and direct overrides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docket_core::UserId;

/// Who ended a grant, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub at: DateTime<Utc>,
    /// `None` when the system ended the row (e.g. a stale expired assignment
    /// superseded by a fresh one).
    pub by: Option<UserId>,
}

/// Lifecycle state of a grant at a given instant.
///
/// `Active` is entered on creation; `Expired` and `Revoked` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Expired,
    Revoked,
}

impl Lifecycle {
    /// Compute the state at `now`.
    ///
    /// A grant is live only while `expires_at > now`; an expiry equal to `now`
    /// is already expired. Revocation wins over expiry.
    pub fn at(
        expires_at: Option<DateTime<Utc>>,
        revocation: Option<&Revocation>,
        now: DateTime<Utc>,
    ) -> Self {
        if revocation.is_some() {
            return Lifecycle::Revoked;
        }
        match expires_at {
            Some(expires_at) if expires_at <= now => Lifecycle::Expired,
            _ => Lifecycle::Active,
        }
    }

    pub fn is_live(self) -> bool {
        self == Lifecycle::Active
    }
}

impl core::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Lifecycle::Active => write!(f, "active"),
            Lifecycle::Expired => write!(f, "expired"),
            Lifecycle::Revoked => write!(f, "revoked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn expiry_boundary_favors_expiry() {
        let now = Utc::now();
        assert_eq!(Lifecycle::at(Some(now), None, now), Lifecycle::Expired);
        assert_eq!(
            Lifecycle::at(Some(now + Duration::seconds(1)), None, now),
            Lifecycle::Active
        );
        assert_eq!(Lifecycle::at(None, None, now), Lifecycle::Active);
    }

    #[test]
    fn revocation_wins_over_expiry() {
        let now = Utc::now();
        let revoked = Revocation { at: now, by: None };
        assert_eq!(
            Lifecycle::at(Some(now - Duration::hours(1)), Some(&revoked), now),
            Lifecycle::Revoked
        );
    }
}
