//! Shared cryptographic primitives for the auth broker.
//!
//! - `jwt`: HS256 signing and verification of broker claim sets

pub mod jwt;

pub use jwt::{Claims, JwtError, JwtKeys, TokenPolicy};
