#![allow(dead_code)]

use auth_broker::config::JwtSettings;
use auth_broker::db::CredentialStore;
use auth_broker::security::{HashCost, JwtKeys, ManualClock, SecretHasher, TokenIssuer};
use auth_broker::AuthBroker;
use std::collections::HashMap;
use std::sync::Arc;

/// 2023-11-14T22:13:20Z
pub const T0: i64 = 1_700_000_000;

/// Argon2id parameters cheap enough for tests
pub fn cheap_hasher() -> SecretHasher {
    SecretHasher::new(HashCost {
        memory_kib: 256,
        iterations: 1,
        parallelism: 1,
    })
    .expect("valid test parameters")
}

pub fn issuer(clock: Arc<ManualClock>) -> TokenIssuer {
    TokenIssuer::new(Arc::new(JwtKeys::generate()), &JwtSettings::default()).with_clock(clock)
}

/// Broker with the local and token strategies over `store`
pub fn broker_over(store: CredentialStore, clock: Arc<ManualClock>) -> AuthBroker {
    let issuer = issuer(clock);
    let registry = AuthBroker::base_registry(&store, &issuer);
    AuthBroker::new(store, registry, issuer)
}

pub fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn password_login(username: &str, password: &str) -> HashMap<String, String> {
    fields(&[("username", username), ("password", password)])
}
