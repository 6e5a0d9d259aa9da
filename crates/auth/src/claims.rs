use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use docket_core::UserId;

/// Tolerated clock drift between the token issuer and this service, in seconds.
pub const CLOCK_SKEW_SECS: i64 = 30;

/// Longest accepted bearer-token lifetime, in hours.
pub const MAX_TOKEN_LIFETIME_HOURS: i64 = 12;

/// Bearer token claims.
///
/// A token only says *who* is calling. It carries no organization and no
/// roles: the tenant context and the permission set are resolved server-side
/// on every request, so a token minted before a role change or an
/// organization switch can never replay stale authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Why a bearer token was rejected. Every variant surfaces as
/// `Unauthenticated`; the distinction is for logs only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("bearer token expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("bearer token issued in the future ({0})")]
    IssuedInFuture(DateTime<Utc>),

    #[error("bearer token lifetime must be positive and at most {MAX_TOKEN_LIFETIME_HOURS}h")]
    BadLifetime,

    #[error("bearer token signature does not verify")]
    BadSignature,

    #[error("bearer token could not be decoded: {0}")]
    Malformed(String),
}

impl JwtClaims {
    /// Check the token's time window at `now`.
    ///
    /// Expiry is strict (`now < expires_at`), matching every other expiry in
    /// the system; only the issue time gets the clock-skew allowance.
    pub fn check_window(&self, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
        let lifetime = self.expires_at - self.issued_at;
        if lifetime <= Duration::zero() || lifetime > Duration::hours(MAX_TOKEN_LIFETIME_HOURS) {
            return Err(TokenValidationError::BadLifetime);
        }
        if self.issued_at > now + Duration::seconds(CLOCK_SKEW_SECS) {
            return Err(TokenValidationError::IssuedInFuture(self.issued_at));
        }
        if now >= self.expires_at {
            return Err(TokenValidationError::Expired(self.expires_at));
        }
        Ok(())
    }
}

/// Verifies a bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HMAC-SHA256 token validator.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // The standard `exp`/`nbf` claims are not used; see `check_window`.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(&secret),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => TokenValidationError::BadSignature,
            _ => TokenValidationError::Malformed(e.to_string()),
        })?;
        data.claims.check_window(now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    fn claims(now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: UserId::new(),
            issued_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    fn sign(claims: &JwtClaims, secret: &[u8]) -> String {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn expiry_is_strict() {
        let now = Utc::now();
        let c = claims(now);
        assert_eq!(c.check_window(now), Ok(()));
        assert_eq!(c.check_window(c.expires_at - Duration::seconds(1)), Ok(()));
        assert_eq!(c.check_window(c.expires_at), Err(TokenValidationError::Expired(c.expires_at)));
    }

    #[test]
    fn issuer_clock_may_run_slightly_ahead() {
        let now = Utc::now();
        let ahead = claims(now + Duration::seconds(CLOCK_SKEW_SECS));
        assert_eq!(ahead.check_window(now), Ok(()));

        let too_far = claims(now + Duration::seconds(CLOCK_SKEW_SECS + 1));
        assert_eq!(
            too_far.check_window(now),
            Err(TokenValidationError::IssuedInFuture(too_far.issued_at))
        );
    }

    #[test]
    fn long_lived_and_inverted_tokens_are_refused() {
        let now = Utc::now();
        let mut c = claims(now);
        c.expires_at = now + Duration::hours(MAX_TOKEN_LIFETIME_HOURS) + Duration::seconds(1);
        assert_eq!(c.check_window(now), Err(TokenValidationError::BadLifetime));

        c.expires_at = now;
        assert_eq!(c.check_window(now), Err(TokenValidationError::BadLifetime));
    }

    #[test]
    fn forged_and_garbled_tokens_are_told_apart() {
        let now = Utc::now();
        let c = claims(now);
        let validator = Hs256JwtValidator::new(b"secret".to_vec());

        assert_eq!(validator.validate(&sign(&c, b"secret"), now).unwrap(), c);
        assert_eq!(
            validator.validate(&sign(&c, b"other"), now),
            Err(TokenValidationError::BadSignature)
        );
        assert!(matches!(
            validator.validate("not-a-token", now),
            Err(TokenValidationError::Malformed(_))
        ));
    }
}
