/// Federated OAuth2/OIDC login
use crate::error::{Result, UpstreamError};
use crate::models::{CredentialBundle, Principal, AUTH_METHOD_ATTR};
use crate::normalizer::{IdentityNormalizer, ProviderKind};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Produces the raw provider profile for a credential bundle
///
/// For an authorization-code flow this is the code exchange plus the
/// profile fetch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(
        &self,
        bundle: &CredentialBundle,
    ) -> std::result::Result<Value, UpstreamError>;
}

#[derive(Clone)]
pub struct FederatedStrategy {
    provider: ProviderKind,
    source: Arc<dyn ProfileSource>,
    normalizer: IdentityNormalizer,
}

impl FederatedStrategy {
    pub fn new(
        provider: ProviderKind,
        source: Arc<dyn ProfileSource>,
        normalizer: IdentityNormalizer,
    ) -> Self {
        Self {
            provider,
            source,
            normalizer,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub async fn verify(&self, bundle: &CredentialBundle) -> Result<Principal> {
        let profile = self.source.fetch_profile(bundle).await?;
        let principal = self.normalizer.normalize(self.provider, &profile)?;

        info!(
            provider = %self.provider,
            subject = %principal.subject,
            "Federated identity resolved"
        );
        Ok(principal.with_attribute(AUTH_METHOD_ATTR, self.provider.as_str()))
    }
}

impl fmt::Debug for FederatedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedStrategy")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}
