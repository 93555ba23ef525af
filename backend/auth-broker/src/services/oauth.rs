/// OAuth 2.0 profile sources
///
/// - GitHub: authorization-code exchange followed by the emails API
/// - Google and discovered OIDC issuers live in `oidc`
/// - Passthrough: profile already fetched by an external OAuth/OIDC client
///
/// ## Security
///
/// - The GitHub login fails unless the granted scope includes `user:email`
/// - Access tokens stay inside this module and are never logged
use crate::config::{OAuthSettings, Secret};
use crate::error::{BrokerError, Result, UpstreamError};
use crate::models::CredentialBundle;
use crate::strategy::ProfileSource;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_EMAIL_SCOPE: &str = "user:email";
const USER_AGENT: &str = concat!("auth-broker/", env!("CARGO_PKG_VERSION"));

/// Bundle field carrying the authorization code
pub const CODE_FIELD: &str = "code";

/// Bundle field carrying a pre-fetched JSON profile
pub const PROFILE_FIELD: &str = "profile";

type UpstreamResult<T> = std::result::Result<T, UpstreamError>;

#[derive(Debug, Deserialize)]
struct GithubTokenResponse {
    access_token: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GitHub OAuth App code flow
#[derive(Clone)]
pub struct GithubProfileSource {
    http: Client,
    client_id: String,
    client_secret: Secret,
    token_url: String,
    emails_url: String,
}

impl GithubProfileSource {
    pub fn new(settings: &OAuthSettings) -> Result<Self> {
        let client_id = settings.github_client_id.clone().ok_or_else(|| {
            BrokerError::Config("GitHub client ID not configured".to_string())
        })?;
        let client_secret = settings.github_client_secret.clone().ok_or_else(|| {
            BrokerError::Config("GitHub client secret not configured".to_string())
        })?;

        Ok(Self {
            http: http_client(settings.timeout_secs)?,
            client_id,
            client_secret,
            token_url: settings.github_token_url.clone(),
            emails_url: settings.github_emails_url.clone(),
        })
    }

    /// URL the user agent is sent to in order to start the flow
    pub fn authorize_url(&self) -> String {
        Self::authorize_url_for(&self.client_id)
    }

    pub fn authorize_url_for(client_id: &str) -> String {
        format!(
            "{}?client_id={}&scope={}",
            GITHUB_AUTHORIZE_URL,
            urlencoding::encode(client_id),
            urlencoding::encode(GITHUB_EMAIL_SCOPE)
        )
    }

    async fn exchange_code(&self, code: &str) -> UpstreamResult<String> {
        let response = self
            .http
            .post(&self.token_url)
            .header(header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose()),
                ("code", code),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<GithubTokenResponse>()
            .await?;

        if let Some(error) = response.error {
            return Err(UpstreamError::Refused(format!(
                "{}: {}",
                error,
                response.error_description.unwrap_or_default()
            )));
        }

        if !scope_grants_email(response.scope.as_deref().unwrap_or_default()) {
            warn!("GitHub user did not consent to release email");
            return Err(UpstreamError::Refused(
                "user did not consent to release email".to_string(),
            ));
        }

        response
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| UpstreamError::Protocol("token response without access_token".into()))
    }
}

impl std::fmt::Debug for GithubProfileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubProfileSource")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .field("emails_url", &self.emails_url)
            .finish()
    }
}

#[async_trait]
impl ProfileSource for GithubProfileSource {
    async fn fetch_profile(&self, bundle: &CredentialBundle) -> UpstreamResult<Value> {
        let code = bundle
            .field(CODE_FIELD)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| UpstreamError::Protocol("no code provided".to_string()))?;

        let access_token = self.exchange_code(code).await?;
        debug!("GitHub code exchanged for access token");

        let emails = self
            .http
            .get(&self.emails_url)
            .bearer_auth(&access_token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        Ok(emails)
    }
}

/// Client shared by the authorization-code sources
pub(crate) fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| BrokerError::Config(format!("HTTP client setup failed: {}", e)))
}

/// GitHub reports scopes comma-separated; other servers use spaces
fn scope_grants_email(scope: &str) -> bool {
    scope
        .split(|c: char| c == ',' || c.is_whitespace())
        .any(|granted| granted == GITHUB_EMAIL_SCOPE)
}

/// Reads the profile JSON from the bundle's `profile` field
///
/// Only for callers that already completed the provider exchange themselves;
/// the broker trusts whatever profile it is handed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProfileSource;

#[async_trait]
impl ProfileSource for PassthroughProfileSource {
    async fn fetch_profile(&self, bundle: &CredentialBundle) -> UpstreamResult<Value> {
        let raw = bundle
            .field(PROFILE_FIELD)
            .ok_or_else(|| UpstreamError::Protocol("no profile provided".to_string()))?;

        serde_json::from_str(raw)
            .map_err(|e| UpstreamError::Protocol(format!("profile is not JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OidcClientSettings;

    fn github_settings() -> OAuthSettings {
        OAuthSettings {
            github_client_id: Some("client id".to_string()),
            github_client_secret: Some(Secret::new("client-secret")),
            // Nothing listens on port 9 of the loopback interface
            github_token_url: "http://127.0.0.1:9/login/oauth/access_token".to_string(),
            github_emails_url: "http://127.0.0.1:9/user/emails".to_string(),
            google: OidcClientSettings::default(),
            oidc_issuer: None,
            oidc: OidcClientSettings::default(),
            timeout_secs: 2,
        }
    }

    #[test]
    fn test_scope_check() {
        assert!(scope_grants_email("user:email"));
        assert!(scope_grants_email("read:user,user:email"));
        assert!(scope_grants_email("openid user:email"));
        assert!(!scope_grants_email(""));
        assert!(!scope_grants_email("read:user"));
        assert!(!scope_grants_email("user:emails"));
    }

    #[test]
    fn test_authorize_url_is_encoded() {
        let source = GithubProfileSource::new(&github_settings()).unwrap();
        assert_eq!(
            source.authorize_url(),
            "https://github.com/login/oauth/authorize?client_id=client%20id&scope=user%3Aemail"
        );
    }

    #[test]
    fn test_requires_credentials() {
        let mut settings = github_settings();
        settings.github_client_secret = None;
        assert!(matches!(
            GithubProfileSource::new(&settings),
            Err(BrokerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_code_fails_before_network() {
        let source = GithubProfileSource::new(&github_settings()).unwrap();
        let result = source.fetch_profile(&CredentialBundle::new("github")).await;
        assert!(matches!(result, Err(UpstreamError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transport_error() {
        let source = GithubProfileSource::new(&github_settings()).unwrap();
        let bundle = CredentialBundle::new("github").with_field(CODE_FIELD, "abc");
        let result = source.fetch_profile(&bundle).await;
        assert!(matches!(result, Err(UpstreamError::Transport(_))));
    }

    #[tokio::test]
    async fn test_passthrough_parses_profile() {
        let bundle = CredentialBundle::new("oidc")
            .with_field(PROFILE_FIELD, r#"{"email":"bob@example.com"}"#);
        let profile = PassthroughProfileSource.fetch_profile(&bundle).await.unwrap();
        assert_eq!(profile["email"], "bob@example.com");

        let broken = CredentialBundle::new("oidc").with_field(PROFILE_FIELD, "{");
        assert!(PassthroughProfileSource.fetch_profile(&broken).await.is_err());
    }
}
