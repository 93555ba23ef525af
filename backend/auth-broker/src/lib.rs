/// Auth Broker Library
///
/// Single entry point that verifies credentials through pluggable
/// strategies and issues stateless signed tokens.
///
/// ## Modules
///
/// - `broker`: Facade wiring store, strategies and token issuer
/// - `config`: Service configuration
/// - `db`: Credential store (JSON document, atomic rewrite)
/// - `error`: Error types
/// - `http`: axum routing layer
/// - `models`: Data models
/// - `normalizer`: Provider profile to principal mapping
/// - `security`: Password hashing, token issuance, clocks
/// - `services`: RADIUS and OAuth upstream clients
/// - `strategy`: Verification strategies and dispatcher
/// - `validators`: Input validation
pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod models;
pub mod normalizer;
pub mod security;
pub mod services;
pub mod strategy;
pub mod validators;

// Re-export commonly used types
pub use broker::AuthBroker;
pub use error::{BrokerError, Result};
