/// JWT signing and verification for broker-issued tokens
///
/// Tokens are compact JWS strings signed with HS256 under a symmetric secret
/// that only the broker process holds.
///
/// ## Security Design
///
/// - **HS256 ONLY**: the validator pins the algorithm, so a token carrying
///   any other `alg` header is rejected before its payload is read
/// - **Explicit keys**: keys are owned by the caller and passed in, there is
///   no process-global key slot
/// - **Signature first**: claims are deserialized only after the MAC has
///   been verified
/// - **Caller-supplied clock**: expiry is checked against the `now` value
///   handed to [`verify`], so callers can test with a simulated clock
///
/// ## Usage
///
/// ```rust
/// use crypto_core::jwt::{self, Claims, JwtKeys, TokenPolicy};
///
/// let keys = JwtKeys::generate();
/// let policy = TokenPolicy::new("localhost:3000", "localhost:3000");
/// let claims = Claims::new("alice", &policy, 1_000, 1_000 + 3600, "user");
///
/// let token = jwt::sign(&keys, &claims).unwrap();
/// let verified = jwt::verify(&keys, &token, &policy, 1_001).unwrap();
/// assert_eq!(verified.sub, "alice");
/// ```
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// JWT algorithm - HMAC-SHA256 with the broker secret
const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

/// Minimum accepted secret length in bytes (256 bits)
pub const MIN_SECRET_LEN: usize = 32;

/// Claim names owned by [`Claims`]; they can never appear in `extra`
pub const RESERVED_CLAIMS: &[&str] = &["sub", "iss", "aud", "iat", "exp", "nbf", "jti", "role"];

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JwtError {
    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("claims violate token invariants: {0}")]
    InvalidClaims(String),

    #[error("signing secret too short: {0} bytes, need at least {MIN_SECRET_LEN}")]
    WeakSecret(usize),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

// ============================================================================
// Data Structures
// ============================================================================

/// Claim set carried by every broker token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (local username or federated identifier)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Role granted to the subject
    pub role: String,
    /// Additional string claims
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Claims {
    pub fn new(sub: &str, policy: &TokenPolicy, iat: i64, exp: i64, role: &str) -> Self {
        Self {
            sub: sub.to_string(),
            iss: policy.issuer.clone(),
            aud: policy.audience.clone(),
            iat,
            exp,
            role: role.to_string(),
            extra: BTreeMap::new(),
        }
    }

    /// Check the structural invariants every issued token must satisfy
    pub fn check_invariants(&self) -> Result<(), JwtError> {
        if self.sub.is_empty() {
            return Err(JwtError::InvalidClaims("subject is empty".to_string()));
        }
        if self.exp <= self.iat {
            return Err(JwtError::InvalidClaims(format!(
                "exp ({}) must be after iat ({})",
                self.exp, self.iat
            )));
        }
        if let Some(key) = self.extra.keys().find(|k| RESERVED_CLAIMS.contains(&k.as_str())) {
            return Err(JwtError::InvalidClaims(format!(
                "extra claim '{key}' shadows a reserved claim"
            )));
        }
        Ok(())
    }
}

/// Fixed issuer/audience pair that tokens are issued for and checked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPolicy {
    pub issuer: String,
    pub audience: String,
}

impl TokenPolicy {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }
}

// ============================================================================
// Key Storage
// ============================================================================

/// Symmetric signing material
///
/// Created once at startup and shared read-only afterwards.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    /// Build keys from an operator-supplied secret
    pub fn from_secret(secret: &[u8]) -> Result<Self, JwtError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(JwtError::WeakSecret(secret.len()));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    /// Generate a fresh random secret from the OS RNG
    pub fn generate() -> Self {
        let mut secret = [0u8; MIN_SECRET_LEN];
        OsRng.fill_bytes(&mut secret);

        Self {
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
        }
    }
}

impl fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtKeys").field("secret", &"<redacted>").finish()
    }
}

// ============================================================================
// Token Generation
// ============================================================================

/// Sign a claim set, returning the compact token string
pub fn sign(keys: &JwtKeys, claims: &Claims) -> Result<String, JwtError> {
    claims.check_invariants()?;

    encode(&Header::new(JWT_ALGORITHM), claims, &keys.encoding)
        .map_err(|e| JwtError::Signing(e.to_string()))
}

// ============================================================================
// Token Validation
// ============================================================================

/// Verify a token and return its claims
///
/// ## Order of checks
///
/// 1. Compact structure, header and algorithm pin (`Malformed`)
/// 2. MAC (`InvalidSignature`)
/// 3. Payload shape, issuer, audience, invariants (`Malformed`)
/// 4. Expiry against `now` (`Expired`); a token is valid while `now < exp`
pub fn verify(
    keys: &JwtKeys,
    token: &str,
    policy: &TokenPolicy,
    now: i64,
) -> Result<Claims, JwtError> {
    let mut validation = Validation::new(JWT_ALGORITHM);
    // Expiry is checked below against the caller's clock
    validation.validate_exp = false;
    validation.leeway = 0;
    validation.set_issuer(&[&policy.issuer]);
    validation.set_audience(&[&policy.audience]);

    let claims = decode::<Claims>(token, &keys.decoding, &validation)
        .map_err(classify)?
        .claims;

    claims
        .check_invariants()
        .map_err(|e| JwtError::Malformed(e.to_string()))?;

    if now >= claims.exp {
        return Err(JwtError::Expired);
    }

    Ok(claims)
}

fn classify(err: jsonwebtoken::errors::Error) -> JwtError {
    match err.kind() {
        ErrorKind::InvalidSignature => JwtError::InvalidSignature,
        ErrorKind::ExpiredSignature => JwtError::Expired,
        _ => JwtError::Malformed(err.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn policy() -> TokenPolicy {
        TokenPolicy::new("localhost:3000", "localhost:3000")
    }

    fn claims(ttl: i64) -> Claims {
        Claims::new("alice", &policy(), NOW, NOW + ttl, "user")
    }

    #[test]
    fn test_sign_and_verify() {
        let keys = JwtKeys::generate();
        let token = sign(&keys, &claims(3600)).expect("should sign");

        assert_eq!(token.matches('.').count(), 2);

        let verified = verify(&keys, &token, &policy(), NOW + 1).expect("should verify");
        assert_eq!(verified, claims(3600));
    }

    #[test]
    fn test_extra_claims_survive() {
        let keys = JwtKeys::generate();
        let mut c = claims(60);
        c.extra.insert("auth_method".to_string(), "local".to_string());

        let token = sign(&keys, &c).unwrap();
        let verified = verify(&keys, &token, &policy(), NOW).unwrap();
        assert_eq!(verified.extra.get("auth_method").map(String::as_str), Some("local"));
    }

    #[test]
    fn test_expired_at_boundary() {
        let keys = JwtKeys::generate();
        let token = sign(&keys, &claims(10)).unwrap();

        assert!(verify(&keys, &token, &policy(), NOW + 9).is_ok());
        assert_eq!(verify(&keys, &token, &policy(), NOW + 10), Err(JwtError::Expired));
    }

    #[test]
    fn test_foreign_secret_is_invalid_signature() {
        let token = sign(&JwtKeys::generate(), &claims(60)).unwrap();
        let other = JwtKeys::generate();

        assert_eq!(verify(&other, &token, &policy(), NOW), Err(JwtError::InvalidSignature));
    }

    #[test]
    fn test_wrong_audience_is_malformed() {
        let keys = JwtKeys::generate();
        let token = sign(&keys, &claims(60)).unwrap();
        let other_policy = TokenPolicy::new("localhost:3000", "elsewhere");

        assert!(matches!(
            verify(&keys, &token, &other_policy, NOW),
            Err(JwtError::Malformed(_))
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let keys = JwtKeys::generate();
        for garbage in ["", "abc", "a.b", "a.b.c", "...."] {
            assert!(
                matches!(verify(&keys, garbage, &policy(), NOW), Err(JwtError::Malformed(_))),
                "expected malformed for {garbage:?}"
            );
        }
    }

    #[test]
    fn test_sign_rejects_broken_invariants() {
        let keys = JwtKeys::generate();

        let mut empty_sub = claims(60);
        empty_sub.sub.clear();
        assert!(matches!(sign(&keys, &empty_sub), Err(JwtError::InvalidClaims(_))));

        assert!(matches!(sign(&keys, &claims(0)), Err(JwtError::InvalidClaims(_))));

        let mut shadow = claims(60);
        shadow.extra.insert("sub".to_string(), "mallory".to_string());
        assert!(matches!(sign(&keys, &shadow), Err(JwtError::InvalidClaims(_))));
    }

    #[test]
    fn test_short_secret_rejected() {
        assert_eq!(
            JwtKeys::from_secret(b"too-short").unwrap_err(),
            JwtError::WeakSecret(9)
        );
        assert!(JwtKeys::from_secret(&[7u8; MIN_SECRET_LEN]).is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let keys = JwtKeys::from_secret(&[b'k'; MIN_SECRET_LEN]).unwrap();
        let rendered = format!("{keys:?}");
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("kkkk"));
    }
}
