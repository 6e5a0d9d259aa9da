use std::borrow::{Borrow, Cow};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docket_core::{DomainError, PermissionId};

/// Stable `"<resource>:<action>"` permission identifier.
///
/// The slug is the contract between the authorization core and every feature
/// module: it is persisted in the catalog and passed verbatim at every check
/// site, so its format is validated on parse and never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionSlug(Cow<'static, str>);

impl PermissionSlug {
    /// Construct from a compile-time literal. The literal is trusted; use
    /// [`PermissionSlug::parse`] for anything that crosses a boundary.
    pub const fn from_static(slug: &'static str) -> Self {
        Self(Cow::Borrowed(slug))
    }

    /// Parse and validate a slug.
    ///
    /// Both halves must be non-empty and contain only lowercase ASCII letters,
    /// digits, `-` or `_`; exactly one `:` separates them.
    pub fn parse(raw: impl Into<Cow<'static, str>>) -> Result<Self, DomainError> {
        let raw = raw.into();
        let (resource, action) = raw
            .split_once(':')
            .ok_or_else(|| DomainError::validation(format!("permission slug '{raw}' must be 'resource:action'")))?;
        for (part, label) in [(resource, "resource"), (action, "action")] {
            if part.is_empty() {
                return Err(DomainError::validation(format!(
                    "permission slug '{raw}' has an empty {label}"
                )));
            }
            if !part.bytes().all(is_slug_byte) {
                return Err(DomainError::validation(format!(
                    "permission slug '{raw}' has invalid characters in its {label}"
                )));
            }
        }
        Ok(Self(raw))
    }

    /// Build a slug from its two halves.
    pub fn from_parts(resource: &str, action: &str) -> Result<Self, DomainError> {
        Self::parse(format!("{resource}:{action}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn resource(&self) -> &str {
        self.split().0
    }

    pub fn action(&self) -> &str {
        self.split().1
    }

    fn split(&self) -> (&str, &str) {
        self.0.split_once(':').unwrap_or((&self.0, ""))
    }
}

fn is_slug_byte(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_'
}

impl Borrow<str> for PermissionSlug {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PermissionSlug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PermissionSlug {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<PermissionSlug> for String {
    fn from(value: PermissionSlug) -> Self {
        value.0.into_owned()
    }
}

impl core::str::FromStr for PermissionSlug {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.to_string())
    }
}

impl core::fmt::Display for PermissionSlug {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permission catalog entry.
///
/// Created by seeding only and never deleted while roles or overrides
/// reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub slug: PermissionSlug,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(slug: PermissionSlug, description: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: PermissionId::new(),
            slug,
            description,
            created_at,
        }
    }

    pub fn resource(&self) -> &str {
        self.slug.resource()
    }

    pub fn action(&self) -> &str {
        self.slug.action()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource_and_action() {
        let slug = PermissionSlug::parse("hearings:read-own").unwrap();
        assert_eq!(slug.resource(), "hearings");
        assert_eq!(slug.action(), "read-own");
        assert_eq!(slug.to_string(), "hearings:read-own");
    }

    #[test]
    fn rejects_malformed_slugs() {
        for raw in ["cases", ":create", "cases:", "Cases:create", "cases:create:all", "cases :read"] {
            assert!(PermissionSlug::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn deserialize_validates() {
        let ok: PermissionSlug = serde_json::from_str("\"roles:assign\"").unwrap();
        assert_eq!(ok.as_str(), "roles:assign");
        assert!(serde_json::from_str::<PermissionSlug>("\"ROLES\"").is_err());
    }

    #[test]
    fn static_and_parsed_slugs_compare_equal() {
        const CASES_CREATE: PermissionSlug = PermissionSlug::from_static("cases:create");
        assert_eq!(PermissionSlug::parse("cases:create").unwrap(), CASES_CREATE);
    }
}
