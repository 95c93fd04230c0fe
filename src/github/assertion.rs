use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::SigningError;
use super::identity::AppIdentity;

/// Backdating applied to `iat` to tolerate clock drift against GitHub.
pub const CLOCK_SKEW_SECS: i64 = 60;

/// Requested assertion lifetime from the signing instant.
pub const ASSERTION_LIFETIME_SECS: i64 = 9 * 60;

/// GitHub rejects app assertions that claim to live longer than this.
pub const MAX_ASSERTION_LIFETIME_SECS: i64 = 10 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// A signed app assertion together with its validity window.
#[derive(Clone)]
pub struct SignedAssertion {
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SignedAssertion {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Sign a short-lived RS256 app assertion for `identity` as of `now`.
///
/// The caller supplies the signing instant, so the same identity and
/// instant always produce the same claims. `iat` is backdated by
/// [`CLOCK_SKEW_SECS`] and `exp` stays well under GitHub's ten minute cap.
pub fn sign(identity: &AppIdentity, now: DateTime<Utc>) -> Result<SignedAssertion, SigningError> {
    let issued_at = now - Duration::seconds(CLOCK_SKEW_SECS);
    let expires_at = now + Duration::seconds(ASSERTION_LIFETIME_SECS);

    let claims = AssertionClaims {
        iat: issued_at.timestamp(),
        exp: expires_at.timestamp(),
        iss: identity.app_id().to_string(),
    };

    let key = EncodingKey::from_rsa_pem(identity.private_key_pem().as_bytes())
        .map_err(|e| SigningError::InvalidKey(e.to_string()))?;

    let token = encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| SigningError::Encode(e.to_string()))?;

    Ok(SignedAssertion {
        token,
        issued_at,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::test_keys;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    fn test_identity() -> AppIdentity {
        AppIdentity::from_parts("12345", 1, test_keys::PRIVATE_KEY_PEM)
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn decode_claims(token: &str) -> AssertionClaims {
        let key = DecodingKey::from_rsa_pem(test_keys::PUBLIC_KEY_PEM.as_bytes()).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&["12345"]);
        validation.set_required_spec_claims(&["iat", "exp", "iss"]);
        // The fixed signing instant is in the past relative to the test run.
        validation.validate_exp = false;
        decode::<AssertionClaims>(token, &key, &validation)
            .unwrap()
            .claims
    }

    #[test]
    fn test_claims_follow_signing_instant() {
        let now = fixed_now();
        let assertion = sign(&test_identity(), now).unwrap();
        let claims = decode_claims(assertion.token());

        assert_eq!(claims.iss, "12345");
        assert_eq!(claims.iat, (now - Duration::seconds(CLOCK_SKEW_SECS)).timestamp());
        assert_eq!(
            claims.exp,
            (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp()
        );
        assert_eq!(assertion.issued_at().timestamp(), claims.iat);
        assert_eq!(assertion.expires_at().timestamp(), claims.exp);
    }

    #[test]
    fn test_same_instant_produces_same_assertion() {
        let now = fixed_now();
        let first = sign(&test_identity(), now).unwrap();
        let second = sign(&test_identity(), now).unwrap();
        // RS256 (PKCS#1 v1.5) signing is deterministic.
        assert_eq!(first.token(), second.token());
    }

    #[test]
    fn test_lifetime_stays_under_github_cap() {
        let now = fixed_now();
        let assertion = sign(&test_identity(), now).unwrap();
        let remaining = assertion.expires_at().timestamp() - now.timestamp();
        assert!(remaining <= MAX_ASSERTION_LIFETIME_SECS);
        assert!(ASSERTION_LIFETIME_SECS < MAX_ASSERTION_LIFETIME_SECS);
    }

    #[test]
    fn test_rejects_unusable_key() {
        let identity = AppIdentity::from_parts("12345", 1, "-----BEGIN NONSENSE-----");
        let err = sign(&identity, fixed_now()).unwrap_err();
        assert!(matches!(err, SigningError::InvalidKey(_)));
        assert!(!err.to_string().contains("NONSENSE"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let assertion = sign(&test_identity(), fixed_now()).unwrap();
        let rendered = format!("{assertion:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(assertion.token()));
    }
}
