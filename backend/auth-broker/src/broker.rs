/// Broker facade
///
/// Ties the credential store, the strategy registry and the token issuer
/// together behind the three entry points callers use: register,
/// authenticate, validate a bearer token.
use crate::config::Settings;
use crate::db::CredentialStore;
use crate::error::Result;
use crate::models::{CredentialBundle, Principal, UserRecord};
use crate::normalizer::{IdentityNormalizer, ProviderKind};
use crate::security::{IssuedToken, SecretHasher, TokenIssuer};
use crate::services::{
    GithubProfileSource, OidcProfileSource, ProviderEndpoints, UdpRadiusClient,
};
use crate::strategy::{
    FederatedStrategy, LocalPasswordStrategy, RadiusStrategy, StrategyRegistry,
    TokenBearerStrategy,
};
use anyhow::Context;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Registry names used by the stock wiring
pub mod names {
    pub const LOCAL: &str = "local";
    pub const RADIUS: &str = "radius";
    pub const GITHUB: &str = "github";
    pub const GOOGLE: &str = "google";
    pub const OIDC: &str = "oidc";
    pub const TOKEN: &str = "token";
}

#[derive(Debug, Clone)]
pub struct AuthBroker {
    store: CredentialStore,
    registry: Arc<StrategyRegistry>,
    issuer: TokenIssuer,
    /// Where each redirect-based strategy starts its flow
    authorize_urls: Arc<BTreeMap<String, String>>,
}

impl AuthBroker {
    pub fn new(store: CredentialStore, registry: StrategyRegistry, issuer: TokenIssuer) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            issuer,
            authorize_urls: Arc::new(BTreeMap::new()),
        }
    }

    /// Record the provider URL that starts the flow for `strategy`
    pub fn with_authorize_url(mut self, strategy: &str, url: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.authorize_urls).insert(strategy.to_string(), url.into());
        self
    }

    /// Registry with the strategies that need no upstream: `local` and `token`
    pub fn base_registry(store: &CredentialStore, issuer: &TokenIssuer) -> StrategyRegistry {
        let mut registry = StrategyRegistry::new();
        registry.register(names::LOCAL, LocalPasswordStrategy::new(store.clone()));
        registry.register(names::TOKEN, TokenBearerStrategy::new(issuer.clone()));
        registry
    }

    /// Build the broker from process settings
    ///
    /// RADIUS, GitHub, Google and OIDC strategies are registered only when
    /// configured. OIDC discovery runs here, so an unreachable issuer fails
    /// startup.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let keys = Arc::new(settings.jwt.signing_keys()?);
        let issuer = TokenIssuer::new(keys, &settings.jwt);

        let hasher = SecretHasher::new(settings.hasher.cost())?;
        debug!(hasher = ?hasher, "Secret hasher configured");
        let store = CredentialStore::open(&settings.store.path, hasher)
            .await
            .context("Failed to open credential store")?;

        let normalizer = IdentityNormalizer::new(settings.radius.realm.clone());
        let mut registry = Self::base_registry(&store, &issuer);
        let mut authorize_urls = Vec::new();

        if settings.radius.is_enabled() {
            let client = UdpRadiusClient::new(&settings.radius)?;
            info!(client = ?client, "RADIUS strategy enabled");
            registry.register(
                names::RADIUS,
                RadiusStrategy::new(Arc::new(client), normalizer.clone()),
            );
        } else {
            info!("RADIUS strategy disabled (RADIUS_SERVER not set)");
        }

        if settings.oauth.github_enabled() {
            let source = GithubProfileSource::new(&settings.oauth)?;
            info!("GitHub OAuth strategy enabled");
            authorize_urls.push((names::GITHUB, source.authorize_url()));
            registry.register(
                names::GITHUB,
                FederatedStrategy::new(ProviderKind::Github, Arc::new(source), normalizer.clone()),
            );
        } else {
            info!("GitHub OAuth strategy disabled (client credentials not set)");
        }

        if settings.oauth.google_enabled() {
            let source = OidcProfileSource::new(
                &settings.oauth.google,
                ProviderEndpoints::google(),
                settings.oauth.timeout_secs,
            )?;
            info!("Google OAuth strategy enabled");
            authorize_urls.push((names::GOOGLE, source.authorize_url()));
            registry.register(
                names::GOOGLE,
                FederatedStrategy::new(ProviderKind::Google, Arc::new(source), normalizer.clone()),
            );
        } else {
            info!("Google OAuth strategy disabled (client credentials not set)");
        }

        match settings.oauth.oidc_issuer.as_deref() {
            Some(issuer_url) if settings.oauth.oidc_enabled() => {
                let source = OidcProfileSource::discover(
                    issuer_url,
                    &settings.oauth.oidc,
                    settings.oauth.timeout_secs,
                )
                .await?;
                info!(issuer = %issuer_url, "OIDC strategy enabled");
                authorize_urls.push((names::OIDC, source.authorize_url()));
                registry.register(
                    names::OIDC,
                    FederatedStrategy::new(ProviderKind::Oidc, Arc::new(source), normalizer),
                );
            }
            _ => info!("OIDC strategy disabled (OIDC_ISSUER not set)"),
        }

        let broker = authorize_urls
            .into_iter()
            .fold(Self::new(store, registry, issuer), |broker, (name, url)| {
                broker.with_authorize_url(name, url)
            });
        Ok(broker)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<UserRecord> {
        self.store.register(username, password).await
    }

    /// Verify `fields` with the named strategy and issue a token
    pub async fn authenticate(
        &self,
        strategy: &str,
        fields: HashMap<String, String>,
    ) -> Result<IssuedToken> {
        let bundle = CredentialBundle {
            strategy_name: strategy.to_string(),
            fields,
        };

        let principal = match self.registry.authenticate(strategy, &bundle).await {
            Ok(principal) => principal,
            Err(e) if e.is_auth_failure() => {
                warn!(strategy = %strategy, reason = e.kind(), "Authentication rejected");
                return Err(e);
            }
            Err(e) => {
                error!(strategy = %strategy, error = %e, "Authentication failed");
                return Err(e);
            }
        };

        let issued = self.issuer.issue_default(&principal)?;
        info!(
            strategy = %strategy,
            subject = %principal.subject,
            exp = issued.claims.exp,
            "Authentication succeeded"
        );
        Ok(issued)
    }

    /// Recover the principal from a presented token
    pub fn validate_bearer(&self, token: &str) -> Result<Principal> {
        self.issuer.validate(token).map_err(|e| {
            debug!(reason = e.kind(), "Bearer token rejected");
            e
        })
    }

    /// Provider URL that starts the redirect flow for `strategy`
    pub fn authorize_url(&self, strategy: &str) -> Option<&str> {
        self.authorize_urls.get(strategy).map(String::as_str)
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }
}
