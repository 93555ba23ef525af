/// Security module for authentication
///
/// Provides core security primitives for the broker:
/// - Password hashing and verification (Argon2id)
/// - Token issuance and validation (HS256 via crypto-core)
/// - Injectable clock for expiry decisions
///
/// ## Architecture
///
/// - **crypto-core::jwt**: signing and verification of claim sets
/// - **password**: Argon2id secret hasher
/// - **token**: claims construction and principal recovery
pub use crypto_core::jwt;
pub use crypto_core::{Claims, JwtKeys, TokenPolicy};

pub mod clock;
pub mod password;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use password::{HashCost, SecretHasher};
pub use token::{IssuedToken, TokenIssuer};
