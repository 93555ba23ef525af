//! Configuration management for the auth broker
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)
//!
//! # Example
//!
//! ```no_run
//! use auth_broker::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("JWT issuer: {}", settings.jwt.issuer);
//!     Ok(())
//! }
//! ```

use crate::security::{HashCost, JwtKeys};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// String value that never shows up in logs or debug output
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub hasher: HasherSettings,
    pub jwt: JwtSettings,
    pub radius: RadiusSettings,
    pub oauth: OAuthSettings,
}

impl Settings {
    /// Load settings from the process environment
    pub fn load() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Self::from_lookup(&|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Settings {
            server: ServerSettings::from_env(lookup)?,
            store: StoreSettings::from_env(lookup),
            hasher: HasherSettings::from_env(lookup)?,
            jwt: JwtSettings::from_env(lookup)?,
            radius: RadiusSettings::from_env(lookup)?,
            oauth: OAuthSettings::from_env(lookup)?,
        })
    }
}

fn parse_or<T>(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}

fn non_empty(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

/// Listener settings for the HTTP adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Mark the token cookie `Secure`
    pub cookie_secure: bool,
}

impl ServerSettings {
    fn from_env(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            host: lookup("BROKER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(lookup, "BROKER_PORT", 3000)?,
            cookie_secure: parse_or(lookup, "COOKIE_SECURE", true)?,
        })
    }
}

/// Credential store location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    pub path: String,
}

impl StoreSettings {
    fn from_env(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            path: lookup("CREDENTIAL_STORE_PATH").unwrap_or_else(|| "database.json".to_string()),
        }
    }
}

/// Argon2id cost factors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HasherSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl HasherSettings {
    fn from_env(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = HashCost::default();
        Ok(Self {
            memory_kib: parse_or(lookup, "ARGON2_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or(lookup, "ARGON2_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or(lookup, "ARGON2_PARALLELISM", defaults.parallelism)?,
        })
    }

    pub fn cost(&self) -> HashCost {
        HashCost {
            memory_kib: self.memory_kib,
            iterations: self.iterations,
            parallelism: self.parallelism,
        }
    }
}

/// Token issuance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    /// Base64 signing secret shared by all broker instances
    #[serde(skip_serializing)]
    pub secret: Option<Secret>,
    pub issuer: String,
    pub audience: String,
    pub ttl_seconds: u64,
    pub role: String,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: "localhost:3000".to_string(),
            audience: "localhost:3000".to_string(),
            ttl_seconds: 604_800, // 1 week
            role: "user".to_string(),
        }
    }
}

impl JwtSettings {
    fn from_env(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let ttl_seconds = parse_or(lookup, "JWT_TTL_SECONDS", defaults.ttl_seconds)?;
        if ttl_seconds == 0 {
            return Err(anyhow!("JWT_TTL_SECONDS must be positive"));
        }

        Ok(Self {
            secret: non_empty(lookup, "JWT_SECRET").map(Secret::new),
            issuer: lookup("JWT_ISSUER").unwrap_or(defaults.issuer),
            audience: lookup("JWT_AUDIENCE").unwrap_or(defaults.audience),
            ttl_seconds,
            role: lookup("JWT_ROLE").unwrap_or(defaults.role),
        })
    }

    /// Build the signing keys for this process
    ///
    /// Without a configured secret a random one is generated; tokens then
    /// stop verifying when the process restarts.
    pub fn signing_keys(&self) -> Result<JwtKeys> {
        match &self.secret {
            Some(secret) => {
                let raw = STANDARD
                    .decode(secret.expose().trim())
                    .context("JWT_SECRET must be base64")?;
                let keys = JwtKeys::from_secret(&raw).context("JWT_SECRET rejected")?;
                info!("JWT signing secret loaded from configuration");
                Ok(keys)
            }
            None => {
                warn!("JWT_SECRET not set; generated an ephemeral signing secret");
                Ok(JwtKeys::generate())
            }
        }
    }
}

/// RADIUS upstream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiusSettings {
    /// `host:port` of the RADIUS server; the strategy is disabled when absent
    pub server: Option<String>,
    #[serde(skip_serializing)]
    pub secret: Option<Secret>,
    /// Realm appended to bare usernames
    pub realm: Option<String>,
    pub timeout_ms: u64,
    pub retries: u32,
    pub nas_identifier: String,
}

impl RadiusSettings {
    fn from_env(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let server = non_empty(lookup, "RADIUS_SERVER");
        let secret = non_empty(lookup, "RADIUS_SECRET").map(Secret::new);
        if server.is_some() && secret.is_none() {
            return Err(anyhow!("RADIUS_SECRET must be set when RADIUS_SERVER is set"));
        }

        Ok(Self {
            server,
            secret,
            realm: non_empty(lookup, "RADIUS_REALM"),
            timeout_ms: parse_or(lookup, "RADIUS_TIMEOUT_MS", 3000)?,
            retries: parse_or(lookup, "RADIUS_RETRIES", 2)?,
            nas_identifier: lookup("RADIUS_NAS_IDENTIFIER")
                .unwrap_or_else(|| "auth-broker".to_string()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.server.is_some()
    }
}

/// OAuth upstream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    pub github_client_id: Option<String>,
    #[serde(skip_serializing)]
    pub github_client_secret: Option<Secret>,
    pub github_token_url: String,
    pub github_emails_url: String,
    /// Google OAuth 2.0 client (fixed Google endpoints)
    pub google: OidcClientSettings,
    /// Issuer URL whose `/.well-known/openid-configuration` is discovered
    pub oidc_issuer: Option<String>,
    /// Client registered with `oidc_issuer`
    pub oidc: OidcClientSettings,
    pub timeout_secs: u64,
}

/// Relying-party registration for one authorization-code provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OidcClientSettings {
    pub client_id: Option<String>,
    #[serde(skip_serializing)]
    pub client_secret: Option<Secret>,
    /// Callback URL registered with the provider
    pub redirect_uri: String,
    pub scope: String,
}

impl OidcClientSettings {
    fn from_env(
        lookup: &dyn Fn(&str) -> Option<String>,
        prefix: &str,
        default_redirect: &str,
    ) -> Self {
        Self {
            client_id: non_empty(lookup, &format!("{}_CLIENT_ID", prefix)),
            client_secret: non_empty(lookup, &format!("{}_CLIENT_SECRET", prefix))
                .map(Secret::new),
            redirect_uri: non_empty(lookup, &format!("{}_REDIRECT_URI", prefix))
                .unwrap_or_else(|| default_redirect.to_string()),
            scope: non_empty(lookup, &format!("{}_SCOPE", prefix))
                .unwrap_or_else(|| "openid email".to_string()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

impl OAuthSettings {
    fn from_env(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let oidc_issuer = non_empty(lookup, "OIDC_ISSUER");
        let oidc = OidcClientSettings::from_env(
            lookup,
            "OIDC",
            "http://localhost:3000/oauth/oidc/callback",
        );
        if oidc_issuer.is_some() && !oidc.is_enabled() {
            return Err(anyhow!(
                "OIDC_CLIENT_ID and OIDC_CLIENT_SECRET must be set when OIDC_ISSUER is set"
            ));
        }

        Ok(Self {
            github_client_id: non_empty(lookup, "GITHUB_CLIENT_ID"),
            github_client_secret: non_empty(lookup, "GITHUB_CLIENT_SECRET").map(Secret::new),
            github_token_url: lookup("GITHUB_TOKEN_URL")
                .unwrap_or_else(|| "https://github.com/login/oauth/access_token".to_string()),
            github_emails_url: lookup("GITHUB_EMAILS_URL")
                .unwrap_or_else(|| "https://api.github.com/user/emails".to_string()),
            google: OidcClientSettings::from_env(
                lookup,
                "GOOGLE",
                "http://localhost:3000/oauth/google/callback",
            ),
            oidc_issuer,
            oidc,
            timeout_secs: parse_or(lookup, "OAUTH_TIMEOUT_SECS", 10)?,
        })
    }

    pub fn github_enabled(&self) -> bool {
        self.github_client_id.is_some() && self.github_client_secret.is_some()
    }

    pub fn google_enabled(&self) -> bool {
        self.google.is_enabled()
    }

    pub fn oidc_enabled(&self) -> bool {
        self.oidc_issuer.is_some() && self.oidc.is_enabled()
    }
}
