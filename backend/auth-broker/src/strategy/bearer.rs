/// Re-authentication from a previously issued token
use crate::error::Result;
use crate::models::{CredentialBundle, Principal, AUTH_METHOD_ATTR};
use crate::security::TokenIssuer;

pub const AUTH_METHOD: &str = "token";

/// Bundle field holding the compact token
pub const TOKEN_FIELD: &str = "token";

#[derive(Debug, Clone)]
pub struct TokenBearerStrategy {
    issuer: TokenIssuer,
}

impl TokenBearerStrategy {
    pub fn new(issuer: TokenIssuer) -> Self {
        Self { issuer }
    }

    /// Validate the `token` field; the original `auth_method` is kept when
    /// the token carries one
    ///
    /// The principal keeps the presented token's expiry as its cap, so
    /// re-authenticating with a token cannot extend its lifetime.
    pub fn verify(&self, bundle: &CredentialBundle) -> Result<Principal> {
        let token = bundle.require(TOKEN_FIELD)?;
        let mut principal = self.issuer.validate(token)?;
        principal
            .attributes
            .entry(AUTH_METHOD_ATTR.to_string())
            .or_insert_with(|| AUTH_METHOD.to_string());
        Ok(principal)
    }
}
