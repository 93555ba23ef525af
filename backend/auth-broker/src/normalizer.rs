/// Federated identity normalization
///
/// Maps raw provider profiles onto a [`Principal`]. Provider-specific field
/// names are known here and nowhere else.
use crate::error::{BrokerError, Result};
use crate::models::Principal;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Attribute naming the identity provider behind a principal
pub const PROVIDER_ATTR: &str = "provider";

/// Identity providers the normalizer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// OAuth2 profile carrying `emails[]`
    Google,
    /// OIDC userinfo carrying `email`
    Oidc,
    /// GitHub emails API list, or a profile carrying `emails[]`
    Github,
    /// RADIUS Access-Accept payload carrying `username`
    Radius,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Oidc => "oidc",
            Self::Github => "github",
            Self::Radius => "radius",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "google" => Ok(Self::Google),
            "oidc" => Ok(Self::Oidc),
            "github" => Ok(Self::Github),
            "radius" => Ok(Self::Radius),
            other => Err(BrokerError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug)]
struct EmailCandidate {
    address: String,
    primary: Option<bool>,
    verified: Option<bool>,
}

impl EmailCandidate {
    /// Accepts `"a@b"`, `{"value": ...}` (OAuth2 profiles) or `{"email": ...}`
    /// (GitHub emails API)
    fn from_entry(entry: &Value) -> Option<Self> {
        if let Some(address) = entry.as_str() {
            return Some(Self {
                address: address.to_string(),
                primary: None,
                verified: None,
            });
        }

        let address = entry
            .get("value")
            .or_else(|| entry.get("email"))
            .and_then(Value::as_str)?;

        Some(Self {
            address: address.to_string(),
            primary: entry.get("primary").and_then(Value::as_bool),
            verified: entry.get("verified").and_then(Value::as_bool),
        })
    }
}

/// Turns provider profiles into principals
#[derive(Debug, Clone, Default)]
pub struct IdentityNormalizer {
    realm: Option<String>,
}

impl IdentityNormalizer {
    /// `realm` qualifies bare RADIUS usernames (`alice` -> `alice@realm`)
    pub fn new(realm: Option<String>) -> Self {
        Self {
            realm: realm.filter(|r| !r.trim().is_empty()),
        }
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// Append the configured realm unless the name is already qualified
    pub fn qualify(&self, username: &str) -> String {
        match &self.realm {
            Some(realm) if !username.contains('@') => format!("{}@{}", username, realm),
            _ => username.to_string(),
        }
    }

    /// Map a raw provider profile to a principal
    ///
    /// ## Errors
    ///
    /// `IncompleteProfile` when no subject can be chosen without guessing.
    pub fn normalize(&self, provider: ProviderKind, profile: &Value) -> Result<Principal> {
        let subject = match provider {
            ProviderKind::Google => match profile.get("emails") {
                Some(list) => select_email(list_candidates(Some(list)))?,
                // Google userinfo endpoint rather than a passport-style profile
                None => select_email(oidc_candidates(profile))?,
            },
            ProviderKind::Oidc => select_email(oidc_candidates(profile))?,
            ProviderKind::Github => {
                let list = if profile.is_array() {
                    Some(profile)
                } else {
                    profile.get("emails")
                };
                select_email(list_candidates(list))?
            }
            ProviderKind::Radius => self.radius_subject(profile)?,
        };

        Ok(Principal::new(subject).with_attribute(PROVIDER_ATTR, provider.as_str()))
    }

    fn radius_subject(&self, profile: &Value) -> Result<String> {
        let username = profile
            .get("username")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                BrokerError::IncompleteProfile("accept payload has no username".to_string())
            })?;

        Ok(self.qualify(username))
    }
}

fn list_candidates(list: Option<&Value>) -> Vec<EmailCandidate> {
    list.and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(EmailCandidate::from_entry).collect())
        .unwrap_or_default()
}

fn oidc_candidates(profile: &Value) -> Vec<EmailCandidate> {
    profile
        .get("email")
        .and_then(Value::as_str)
        .map(|address| EmailCandidate {
            address: address.to_string(),
            primary: None,
            verified: profile
                .get("email_verified")
                .or_else(|| profile.get("verified_email"))
                .and_then(Value::as_bool),
        })
        .into_iter()
        .collect()
}

/// One usable candidate wins; several need exactly one marked primary
fn select_email(candidates: Vec<EmailCandidate>) -> Result<String> {
    let usable: Vec<EmailCandidate> = candidates
        .into_iter()
        .filter(|c| c.verified != Some(false))
        .filter(|c| !c.address.trim().is_empty())
        .collect();

    let chosen = match usable.as_slice() {
        [] => {
            return Err(BrokerError::IncompleteProfile(
                "profile has no verified email".to_string(),
            ))
        }
        [only] => only,
        many => {
            let mut primaries = many.iter().filter(|c| c.primary == Some(true));
            match (primaries.next(), primaries.next()) {
                (Some(primary), None) => primary,
                _ => {
                    return Err(BrokerError::IncompleteProfile(
                        "profile has several emails and no single primary".to_string(),
                    ))
                }
            }
        }
    };

    Ok(chosen.address.trim().to_lowercase())
}
