/// Delegated verification against a RADIUS server
use crate::error::{BrokerError, Result, UpstreamError};
use crate::models::{CredentialBundle, Principal, AUTH_METHOD_ATTR};
use crate::normalizer::{IdentityNormalizer, ProviderKind};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub const AUTH_METHOD: &str = "radius";

/// Outcome of an Access-Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadiusDecision {
    /// Access-Accept with its reply attributes
    Accept(BTreeMap<String, String>),
    Reject,
}

/// Client side of the RADIUS exchange
///
/// Implementations own timeouts and retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadiusClient: Send + Sync {
    async fn access_request(
        &self,
        username: &str,
        password: &str,
    ) -> std::result::Result<RadiusDecision, UpstreamError>;
}

#[derive(Clone)]
pub struct RadiusStrategy {
    client: Arc<dyn RadiusClient>,
    normalizer: IdentityNormalizer,
}

impl RadiusStrategy {
    pub fn new(client: Arc<dyn RadiusClient>, normalizer: IdentityNormalizer) -> Self {
        Self { client, normalizer }
    }

    /// Sends the realm-qualified name upstream; the accept payload is then
    /// normalized like any other provider profile
    pub async fn verify(&self, bundle: &CredentialBundle) -> Result<Principal> {
        let username = bundle.require("username")?;
        let password = bundle.require("password")?;
        let qualified = self.normalizer.qualify(username);

        let attributes = match self.client.access_request(&qualified, password).await? {
            RadiusDecision::Accept(attributes) => attributes,
            RadiusDecision::Reject => {
                warn!(username = %qualified, "RADIUS access rejected");
                return Err(BrokerError::InvalidCredentials);
            }
        };
        info!(username = %qualified, "RADIUS access accepted");

        let mut payload: Map<String, Value> = attributes
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        payload.insert("username".to_string(), Value::String(qualified));

        let principal = self
            .normalizer
            .normalize(ProviderKind::Radius, &Value::Object(payload))?;
        Ok(principal.with_attribute(AUTH_METHOD_ATTR, AUTH_METHOD))
    }
}

impl fmt::Debug for RadiusStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadiusStrategy")
            .field("realm", &self.normalizer.realm())
            .finish_non_exhaustive()
    }
}
