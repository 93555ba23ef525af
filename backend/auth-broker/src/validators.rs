use crate::error::{BrokerError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Input validation for registration

// Compile regex patterns once at startup
// These patterns are hardcoded and always valid, so we use expect() with explicit reasoning
static USERNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    // This regex is hardcoded and validated - it is a compile-time constant in practice
    Regex::new(r"^[A-Za-z0-9._+-]{1,64}$")
        .expect("hardcoded username regex is invalid - fix source code")
});

/// Upper bound on password length; Argon2 accepts more, this caps request work
pub const MAX_PASSWORD_BYTES: usize = 1024;

/// Validate username format (1-64 characters: alphanumeric and `._+-`)
///
/// `@` is excluded: federated and realm-qualified subjects are email-shaped,
/// and a local account must never share a subject with one of them.
pub fn validate_username(username: &str) -> bool {
    USERNAME_REGEX.is_match(username)
}

/// Validate password bounds (non-empty, at most 1024 bytes)
pub fn validate_password(password: &str) -> bool {
    !password.is_empty() && password.len() <= MAX_PASSWORD_BYTES
}

/// Check both registration inputs, naming the first field that fails
pub fn validate_registration(username: &str, password: &str) -> Result<()> {
    if !validate_username(username) {
        return Err(BrokerError::Validation(
            "username must be 1-64 characters of letters, digits or ._+-".to_string(),
        ));
    }
    if !validate_password(password) {
        return Err(BrokerError::Validation(format!(
            "password must be between 1 and {} bytes",
            MAX_PASSWORD_BYTES
        )));
    }
    Ok(())
}
