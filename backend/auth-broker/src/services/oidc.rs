/// OpenID Connect relying party for authorization-code logins
///
/// - Google: fixed OAuth 2.0 endpoints, userinfo v2 document
/// - Any other issuer: endpoints read from its discovery document
///
/// The profile handed to the normalizer is the userinfo response as-is.
use crate::config::{OidcClientSettings, Secret};
use crate::error::{BrokerError, Result, UpstreamError};
use crate::models::CredentialBundle;
use crate::services::oauth::{http_client, CODE_FIELD};
use crate::strategy::ProfileSource;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

type UpstreamResult<T> = std::result::Result<T, UpstreamError>;

/// Endpoints of an authorization-code provider
///
/// Field names follow the discovery document, so it deserializes directly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
}

impl ProviderEndpoints {
    pub fn google() -> Self {
        Self {
            authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_endpoint: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Clone)]
pub struct OidcProfileSource {
    http: Client,
    client_id: String,
    client_secret: Secret,
    redirect_uri: String,
    scope: String,
    endpoints: ProviderEndpoints,
}

impl OidcProfileSource {
    pub fn new(
        settings: &OidcClientSettings,
        endpoints: ProviderEndpoints,
        timeout_secs: u64,
    ) -> Result<Self> {
        Self::with_client(http_client(timeout_secs)?, settings, endpoints)
    }

    /// Read `issuer`'s discovery document and build a source from it
    pub async fn discover(
        issuer: &str,
        settings: &OidcClientSettings,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http = http_client(timeout_secs)?;
        let url = format!("{}{}", issuer.trim_end_matches('/'), DISCOVERY_PATH);

        let endpoints = fetch_endpoints(&http, &url)
            .await
            .map_err(|e| BrokerError::Config(format!("OIDC discovery at {} failed: {}", url, e)))?;
        info!(issuer = %issuer, token_endpoint = %endpoints.token_endpoint, "OIDC issuer discovered");

        Self::with_client(http, settings, endpoints)
    }

    fn with_client(
        http: Client,
        settings: &OidcClientSettings,
        endpoints: ProviderEndpoints,
    ) -> Result<Self> {
        let client_id = settings
            .client_id
            .clone()
            .ok_or_else(|| BrokerError::Config("OIDC client ID not configured".to_string()))?;
        let client_secret = settings
            .client_secret
            .clone()
            .ok_or_else(|| BrokerError::Config("OIDC client secret not configured".to_string()))?;

        Ok(Self {
            http,
            client_id,
            client_secret,
            redirect_uri: settings.redirect_uri.clone(),
            scope: settings.scope.clone(),
            endpoints,
        })
    }

    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    /// URL the user agent is sent to in order to start the flow
    pub fn authorize_url(&self) -> String {
        let endpoint = &self.endpoints.authorization_endpoint;
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}",
            endpoint,
            separator,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.scope)
        )
    }

    async fn exchange_code(&self, code: &str) -> UpstreamResult<String> {
        let response = self
            .http
            .post(&self.endpoints.token_endpoint)
            .header(header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose()),
            ])
            .send()
            .await?;

        // Token errors arrive as a JSON body on a 400
        let status = response.status();
        let body = response.json::<TokenResponse>().await?;

        if let Some(error) = body.error {
            warn!(status = %status, error = %error, "OIDC token endpoint refused the code");
            return Err(UpstreamError::Refused(format!(
                "{}: {}",
                error,
                body.error_description.unwrap_or_default()
            )));
        }
        if !status.is_success() {
            return Err(UpstreamError::Protocol(format!(
                "token endpoint answered {}",
                status
            )));
        }

        body.access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| UpstreamError::Protocol("token response without access_token".into()))
    }
}

impl std::fmt::Debug for OidcProfileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcProfileSource")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

async fn fetch_endpoints(http: &Client, url: &str) -> UpstreamResult<ProviderEndpoints> {
    let endpoints = http
        .get(url)
        .header(header::ACCEPT, "application/json")
        .send()
        .await?
        .error_for_status()?
        .json::<ProviderEndpoints>()
        .await?;
    Ok(endpoints)
}

#[async_trait]
impl ProfileSource for OidcProfileSource {
    async fn fetch_profile(&self, bundle: &CredentialBundle) -> UpstreamResult<Value> {
        let code = bundle
            .field(CODE_FIELD)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| UpstreamError::Protocol("no code provided".to_string()))?;

        let access_token = self.exchange_code(code).await?;
        debug!("OIDC code exchanged for access token");

        let userinfo = self
            .http
            .get(&self.endpoints.userinfo_endpoint)
            .bearer_auth(&access_token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        Ok(userinfo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_settings() -> OidcClientSettings {
        OidcClientSettings {
            client_id: Some("broker rp".to_string()),
            client_secret: Some(Secret::new("rp-secret")),
            redirect_uri: "http://localhost:3000/oauth/google/callback".to_string(),
            scope: "openid email".to_string(),
        }
    }

    #[test]
    fn test_google_authorize_url() {
        let source =
            OidcProfileSource::new(&client_settings(), ProviderEndpoints::google(), 2).unwrap();
        assert_eq!(
            source.authorize_url(),
            "https://accounts.google.com/o/oauth2/v2/auth?response_type=code\
             &client_id=broker%20rp\
             &redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Foauth%2Fgoogle%2Fcallback\
             &scope=openid%20email"
        );
    }

    #[test]
    fn test_authorize_endpoint_with_query() {
        let endpoints = ProviderEndpoints {
            authorization_endpoint: "https://idp.example.com/auth?tenant=upc".to_string(),
            token_endpoint: "https://idp.example.com/token".to_string(),
            userinfo_endpoint: "https://idp.example.com/userinfo".to_string(),
        };
        let source = OidcProfileSource::new(&client_settings(), endpoints, 2).unwrap();
        assert!(source
            .authorize_url()
            .starts_with("https://idp.example.com/auth?tenant=upc&response_type=code&"));
    }

    #[test]
    fn test_requires_client_credentials() {
        let mut settings = client_settings();
        settings.client_id = None;
        assert!(matches!(
            OidcProfileSource::new(&settings, ProviderEndpoints::google(), 2),
            Err(BrokerError::Config(_))
        ));
    }

    #[test]
    fn test_discovery_document_shape() {
        let document = serde_json::json!({
            "issuer": "https://accounts.google.com",
            "authorization_endpoint": "https://accounts.google.com/o/oauth2/v2/auth",
            "token_endpoint": "https://oauth2.googleapis.com/token",
            "userinfo_endpoint": "https://openidconnect.googleapis.com/v1/userinfo",
            "jwks_uri": "https://www.googleapis.com/oauth2/v3/certs",
            "scopes_supported": ["openid", "email", "profile"]
        });
        let endpoints: ProviderEndpoints = serde_json::from_value(document).unwrap();
        assert_eq!(endpoints.token_endpoint, "https://oauth2.googleapis.com/token");
        assert_eq!(
            endpoints.userinfo_endpoint,
            "https://openidconnect.googleapis.com/v1/userinfo"
        );
    }

    #[tokio::test]
    async fn test_unreachable_issuer_is_config_error() {
        // Nothing listens on port 9 of the loopback interface
        let result = OidcProfileSource::discover("http://127.0.0.1:9/", &client_settings(), 2).await;
        assert!(matches!(result, Err(BrokerError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_code_fails_before_network() {
        let source =
            OidcProfileSource::new(&client_settings(), ProviderEndpoints::google(), 2).unwrap();
        let result = source.fetch_profile(&CredentialBundle::new("google")).await;
        assert!(matches!(result, Err(UpstreamError::Protocol(_))));
    }
}
