/// Authentication strategies and the name-based dispatcher
///
/// Each strategy turns a [`CredentialBundle`] into a [`Principal`] or a
/// failure. The set of strategy kinds is closed; the mapping from route
/// names to configured strategies is built once at startup.
pub mod bearer;
pub mod federated;
pub mod local;
pub mod radius;

pub use bearer::TokenBearerStrategy;
pub use federated::{FederatedStrategy, ProfileSource};
pub use local::LocalPasswordStrategy;
pub use radius::{RadiusClient, RadiusDecision, RadiusStrategy};

use crate::error::{BrokerError, Result};
use crate::models::{CredentialBundle, Principal};
use std::collections::HashMap;
use std::sync::Arc;

/// A configured verification strategy
#[derive(Debug)]
pub enum Strategy {
    LocalPassword(LocalPasswordStrategy),
    Radius(RadiusStrategy),
    FederatedOAuth(FederatedStrategy),
    TokenBearer(TokenBearerStrategy),
}

impl Strategy {
    /// Value recorded in the `auth_method` attribute of produced principals
    pub fn kind(&self) -> &'static str {
        match self {
            Strategy::LocalPassword(_) => local::AUTH_METHOD,
            Strategy::Radius(_) => radius::AUTH_METHOD,
            Strategy::FederatedOAuth(federated) => federated.provider().as_str(),
            Strategy::TokenBearer(_) => bearer::AUTH_METHOD,
        }
    }

    pub async fn verify(&self, bundle: &CredentialBundle) -> Result<Principal> {
        match self {
            Strategy::LocalPassword(strategy) => strategy.verify(bundle).await,
            Strategy::Radius(strategy) => strategy.verify(bundle).await,
            Strategy::FederatedOAuth(strategy) => strategy.verify(bundle).await,
            Strategy::TokenBearer(strategy) => strategy.verify(bundle),
        }
    }
}

impl From<LocalPasswordStrategy> for Strategy {
    fn from(strategy: LocalPasswordStrategy) -> Self {
        Strategy::LocalPassword(strategy)
    }
}

impl From<RadiusStrategy> for Strategy {
    fn from(strategy: RadiusStrategy) -> Self {
        Strategy::Radius(strategy)
    }
}

impl From<FederatedStrategy> for Strategy {
    fn from(strategy: FederatedStrategy) -> Self {
        Strategy::FederatedOAuth(strategy)
    }
}

impl From<TokenBearerStrategy> for Strategy {
    fn from(strategy: TokenBearerStrategy) -> Self {
        Strategy::TokenBearer(strategy)
    }
}

/// Name -> strategy table
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a strategy under `name`, returning any entry it replaces
    pub fn register(
        &mut self,
        name: impl Into<String>,
        strategy: impl Into<Strategy>,
    ) -> Option<Arc<Strategy>> {
        self.strategies.insert(name.into(), Arc::new(strategy.into()))
    }

    pub fn get(&self, name: &str) -> Option<&Strategy> {
        self.strategies.get(name).map(Arc::as_ref)
    }

    /// Route a bundle to the strategy registered under `name`
    ///
    /// There is no fallback: a failure from the named strategy is final.
    pub async fn authenticate(&self, name: &str, bundle: &CredentialBundle) -> Result<Principal> {
        let strategy = self
            .strategies
            .get(name)
            .ok_or_else(|| BrokerError::UnknownStrategy(name.to_string()))?;

        strategy.verify(bundle).await
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
