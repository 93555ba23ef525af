/// Username/password verification against the credential store
use crate::db::CredentialStore;
use crate::error::{BrokerError, Result};
use crate::models::{CredentialBundle, Principal, AUTH_METHOD_ATTR};
use crate::validators::validate_username;
use std::time::Instant;
use tracing::debug;

pub const AUTH_METHOD: &str = "local";

#[derive(Debug, Clone)]
pub struct LocalPasswordStrategy {
    store: CredentialStore,
}

impl LocalPasswordStrategy {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    /// Reads `username` and `password` from the bundle
    ///
    /// Unknown users are checked against a decoy hash, so both failure
    /// cases cost one full verification and return `InvalidCredentials`.
    /// Names outside the local username format count as unknown even when
    /// a hand-edited store file holds them.
    pub async fn verify(&self, bundle: &CredentialBundle) -> Result<Principal> {
        let username = bundle.require("username")?;
        let password = bundle.require("password")?;

        let start = Instant::now();
        let record = Some(username)
            .filter(|name| validate_username(name))
            .and_then(|name| self.store.lookup(name));
        let verified = match record {
            Some(record) => {
                self.store
                    .verify_password(password, &record.password_hash)
                    .await?
            }
            None => self.store.verify_decoy(password).await?,
        };
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Password hash verification finished"
        );

        if !verified {
            return Err(BrokerError::InvalidCredentials);
        }

        Ok(Principal::new(username).with_attribute(AUTH_METHOD_ATTR, AUTH_METHOD))
    }
}
