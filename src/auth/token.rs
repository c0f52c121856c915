//! Signed, self-describing session tokens.
//!
//! A token is `base64url(claims JSON) "." base64url(HMAC-SHA256(claims))`.
//! The claims carry the identity, kind, and expiry, so a token can be
//! verified without a store lookup; store membership stays authoritative
//! (see [`crate::auth::SessionStore::validate`]).

use crate::error::AuthError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Session token kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims embedded in a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user identity.
    pub user_id: String,
    /// Token kind.
    pub kind: TokenKind,
    /// Expiry as unix seconds.
    pub exp: i64,
    /// Unique token id. Two tokens issued within the same second for the
    /// same identity must still differ as store keys.
    pub jti: Uuid,
}

/// Sign claims into a token string.
pub fn sign(claims: &Claims, secret: &[u8]) -> Result<String, AuthError> {
    let body = serde_json::to_vec(claims).map_err(|_| AuthError::InvalidToken)?;
    let payload = URL_SAFE_NO_PAD.encode(body);

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| AuthError::InvalidToken)?;
    mac.update(payload.as_bytes());
    let tag = mac.finalize().into_bytes();

    Ok(format!("{payload}.{}", URL_SAFE_NO_PAD.encode(tag)))
}

/// Verify a token's signature and embedded expiry, returning its claims.
///
/// Signature is checked before anything is decoded from the payload; the
/// tag comparison is constant-time.
pub fn verify(token: &str, secret: &[u8], now: DateTime<Utc>) -> Result<Claims, AuthError> {
    let (payload, tag_b64) = token.split_once('.').ok_or(AuthError::InvalidToken)?;
    let tag = URL_SAFE_NO_PAD
        .decode(tag_b64)
        .map_err(|_| AuthError::InvalidToken)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| AuthError::InvalidToken)?;
    mac.update(payload.as_bytes());
    let expected = mac.finalize().into_bytes();

    if !bool::from(expected.as_slice().ct_eq(tag.as_slice())) {
        return Err(AuthError::InvalidToken);
    }

    let body = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: Claims = serde_json::from_slice(&body).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp <= now.timestamp() {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &[u8] = b"unit-test-signing-secret";

    fn claims_for(user: &str, exp: DateTime<Utc>) -> Claims {
        Claims {
            user_id: user.to_string(),
            kind: TokenKind::Access,
            exp: exp.timestamp(),
            jti: Uuid::new_v4(),
        }
    }

    #[test]
    fn sign_verify_roundtrip() {
        let now = Utc::now();
        let claims = claims_for("u-1", now + Duration::minutes(5));
        let token = sign(&claims, SECRET).unwrap();

        let verified = verify(&token, SECRET, now).unwrap();
        assert_eq!(verified.user_id, "u-1");
        assert_eq!(verified.kind, TokenKind::Access);
        assert_eq!(verified.jti, claims.jti);
    }

    #[test]
    fn tampered_payload_rejected() {
        let now = Utc::now();
        let claims = claims_for("u-1", now + Duration::minutes(5));
        let token = sign(&claims, SECRET).unwrap();

        // Flip the first character of the payload segment.
        let mut tampered = token.clone().into_bytes();
        tampered[0] = if tampered[0] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();

        assert!(matches!(
            verify(&tampered, SECRET, now),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn wrong_secret_rejected() {
        let now = Utc::now();
        let token = sign(&claims_for("u-1", now + Duration::minutes(5)), SECRET).unwrap();
        assert!(matches!(
            verify(&token, b"a-different-secret", now),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expiry_boundary() {
        let now = Utc::now();
        let token = sign(&claims_for("u-1", now + Duration::seconds(30)), SECRET).unwrap();

        assert!(verify(&token, SECRET, now).is_ok());
        // Exactly at expiry counts as expired.
        assert!(matches!(
            verify(&token, SECRET, now + Duration::seconds(30)),
            Err(AuthError::Expired)
        ));
        assert!(matches!(
            verify(&token, SECRET, now + Duration::minutes(1)),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn same_second_tokens_differ() {
        let exp = Utc::now() + Duration::minutes(5);
        let a = sign(&claims_for("u-1", exp), SECRET).unwrap();
        let b = sign(&claims_for("u-1", exp), SECRET).unwrap();
        assert_ne!(a, b);
    }
}
