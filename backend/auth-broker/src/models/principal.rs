use crate::error::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Attribute naming the strategy that produced a principal
pub const AUTH_METHOD_ATTR: &str = "auth_method";

/// Normalized identity produced by a successful verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identifier: local username, federated email or realm-qualified user
    pub subject: String,
    pub attributes: BTreeMap<String, String>,
    /// Latest expiry any token issued for this principal may carry
    ///
    /// Set when the principal was recovered from a token, so a re-issued
    /// token never outlives the one that was presented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            attributes: BTreeMap::new(),
            expires_at: None,
        }
    }

    pub fn with_expiry_cap(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Transient credential input routed to a named strategy
#[derive(Clone, Default)]
pub struct CredentialBundle {
    pub strategy_name: String,
    pub fields: HashMap<String, String>,
}

impl CredentialBundle {
    pub fn new(strategy_name: impl Into<String>) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Fetch a non-empty field; a missing credential is a plain login failure
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.field(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(BrokerError::InvalidCredentials),
        }
    }
}

// Field values may hold passwords, so only the keys are printed
impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort();
        f.debug_struct("CredentialBundle")
            .field("strategy_name", &self.strategy_name)
            .field("fields", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_rejects_missing_and_empty() {
        let bundle = CredentialBundle::new("local")
            .with_field("username", "alice")
            .with_field("password", "");

        assert_eq!(bundle.require("username").unwrap(), "alice");
        assert!(matches!(
            bundle.require("password"),
            Err(BrokerError::InvalidCredentials)
        ));
        assert!(matches!(
            bundle.require("otp"),
            Err(BrokerError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_debug_hides_values() {
        let bundle = CredentialBundle::new("local").with_field("password", "s3cret");
        let rendered = format!("{bundle:?}");
        assert!(rendered.contains("password"));
        assert!(!rendered.contains("s3cret"));
    }
}
