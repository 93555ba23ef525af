/// Token issuance and validation for authenticated principals
use crate::config::JwtSettings;
use crate::error::{BrokerError, Result};
use crate::models::Principal;
use crate::security::clock::{Clock, SystemClock};
use crypto_core::jwt::{self, Claims, JwtKeys, TokenPolicy, RESERVED_CLAIMS};
use std::fmt;
use std::sync::Arc;

/// Attribute carrying the role claim on validated principals
pub const ROLE_ATTR: &str = "role";

/// Signed token plus the claims it encodes
#[derive(Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

impl IssuedToken {
    pub fn ttl_seconds(&self) -> i64 {
        self.claims.exp - self.claims.iat
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Turns principals into signed claim sets and back
///
/// The signing keys are handed in at construction and used nowhere else.
#[derive(Clone)]
pub struct TokenIssuer {
    keys: Arc<JwtKeys>,
    policy: TokenPolicy,
    role: String,
    default_ttl: u64,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(keys: Arc<JwtKeys>, settings: &JwtSettings) -> Self {
        Self {
            keys,
            policy: TokenPolicy::new(settings.issuer.clone(), settings.audience.clone()),
            role: settings.role.clone(),
            default_ttl: settings.ttl_seconds,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    /// Issue a token valid for `ttl_seconds` from now
    ///
    /// Principal attributes become extra claims, except names the claim set
    /// already owns. A principal recovered from a token caps `exp` at that
    /// token's expiry.
    pub fn issue(&self, principal: &Principal, ttl_seconds: u64) -> Result<IssuedToken> {
        if principal.subject.is_empty() {
            return Err(BrokerError::Validation("principal subject is empty".to_string()));
        }
        if ttl_seconds == 0 {
            return Err(BrokerError::Validation("token ttl must be positive".to_string()));
        }

        let now = self.clock.now();
        let exp = i64::try_from(ttl_seconds)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| BrokerError::Validation("token ttl out of range".to_string()))?;
        let exp = match principal.expires_at {
            Some(cap) if cap <= now => return Err(BrokerError::Expired),
            Some(cap) => exp.min(cap),
            None => exp,
        };

        let mut claims = Claims::new(&principal.subject, &self.policy, now, exp, &self.role);
        claims.extra = principal
            .attributes
            .iter()
            .filter(|(key, _)| !RESERVED_CLAIMS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let token = jwt::sign(&self.keys, &claims)?;
        Ok(IssuedToken { token, claims })
    }

    /// Issue a token with the configured lifetime
    pub fn issue_default(&self, principal: &Principal) -> Result<IssuedToken> {
        self.issue(principal, self.default_ttl)
    }

    /// Validate a presented token and recover its principal
    pub fn validate(&self, token: &str) -> Result<Principal> {
        let claims = jwt::verify(&self.keys, token, &self.policy, self.clock.now())?;

        let mut principal = Principal::new(claims.sub).with_expiry_cap(claims.exp);
        principal.attributes = claims.extra;
        principal
            .attributes
            .insert(ROLE_ATTR.to_string(), claims.role);
        Ok(principal)
    }
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("policy", &self.policy)
            .field("role", &self.role)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
