use axum::http::StatusCode;
use crypto_core::JwtError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("User already registered")]
    DuplicateUser,

    #[error("Unknown authentication strategy: {0}")]
    UnknownStrategy(String),

    /// Wrong password, unknown user, or a failed upstream check.
    /// The cases are never distinguished.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Incomplete provider profile: {0}")]
    IncompleteProfile(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Malformed token")]
    Malformed,

    #[error("Storage fault: {0}")]
    StorageFault(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Failure reported by an upstream identity provider client
///
/// These never reach the caller as-is; strategies log them and answer
/// `InvalidCredentials`.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream timed out after {0} attempts")]
    Timeout(u32),

    #[error("Upstream transport error: {0}")]
    Transport(String),

    #[error("Upstream protocol error: {0}")]
    Protocol(String),

    #[error("Upstream refused the request: {0}")]
    Refused(String),
}

impl From<std::io::Error> for UpstreamError {
    fn from(err: std::io::Error) -> Self {
        UpstreamError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            UpstreamError::Protocol(err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

impl From<UpstreamError> for BrokerError {
    fn from(err: UpstreamError) -> Self {
        tracing::warn!(error = %err, "Upstream identity check failed");
        BrokerError::InvalidCredentials
    }
}

impl BrokerError {
    /// Stable machine-readable label for the failure
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::DuplicateUser => "duplicate_user",
            BrokerError::UnknownStrategy(_) => "unknown_strategy",
            BrokerError::InvalidCredentials => "invalid_credentials",
            BrokerError::IncompleteProfile(_) => "incomplete_profile",
            BrokerError::InvalidSignature => "invalid_signature",
            BrokerError::Expired => "expired",
            BrokerError::Malformed => "malformed",
            BrokerError::StorageFault(_) => "storage_fault",
            BrokerError::Validation(_) => "validation",
            BrokerError::Config(_) => "config",
            BrokerError::Internal(_) => "internal",
        }
    }

    /// True for routine, recoverable outcomes the caller should answer with
    /// a retry or redirect rather than a server error
    pub fn is_auth_failure(&self) -> bool {
        !matches!(
            self,
            BrokerError::StorageFault(_) | BrokerError::Config(_) | BrokerError::Internal(_)
        )
    }

    /// Convert to an HTTP status for the routing layer
    pub fn status_code(&self) -> StatusCode {
        match self {
            BrokerError::DuplicateUser => StatusCode::CONFLICT,
            BrokerError::UnknownStrategy(_) => StatusCode::NOT_FOUND,
            BrokerError::InvalidCredentials
            | BrokerError::IncompleteProfile(_)
            | BrokerError::InvalidSignature
            | BrokerError::Expired
            | BrokerError::Malformed => StatusCode::UNAUTHORIZED,
            BrokerError::Validation(_) => StatusCode::BAD_REQUEST,
            BrokerError::StorageFault(_) | BrokerError::Config(_) | BrokerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to the client
    pub fn public_message(&self) -> String {
        match self {
            BrokerError::StorageFault(_) | BrokerError::Config(_) | BrokerError::Internal(_) => {
                // Don't leak internal details
                "Internal server error".to_string()
            }
            BrokerError::InvalidSignature | BrokerError::Expired | BrokerError::Malformed => {
                "Invalid or expired token".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<JwtError> for BrokerError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::InvalidSignature => BrokerError::InvalidSignature,
            JwtError::Expired => BrokerError::Expired,
            JwtError::Malformed(_) => BrokerError::Malformed,
            JwtError::InvalidClaims(msg) => BrokerError::Validation(msg),
            JwtError::WeakSecret(_) => BrokerError::Config(err.to_string()),
            JwtError::Signing(msg) => BrokerError::Internal(msg),
        }
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        tracing::error!("Storage I/O error: {}", err);
        BrokerError::StorageFault(err.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("Storage encoding error: {}", err);
        BrokerError::StorageFault(err.to_string())
    }
}

impl From<tokio::task::JoinError> for BrokerError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrokerError::Internal(format!("background task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_fault_is_not_auth_failure() {
        let err = BrokerError::StorageFault("disk gone".to_string());
        assert!(!err.is_auth_failure());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn test_token_failures_render_uniformly() {
        for err in [
            BrokerError::InvalidSignature,
            BrokerError::Expired,
            BrokerError::Malformed,
        ] {
            assert!(err.is_auth_failure());
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
            assert_eq!(err.public_message(), "Invalid or expired token");
        }
    }

    #[test]
    fn test_jwt_error_mapping() {
        assert!(matches!(
            BrokerError::from(JwtError::InvalidSignature),
            BrokerError::InvalidSignature
        ));
        assert!(matches!(BrokerError::from(JwtError::Expired), BrokerError::Expired));
        assert!(matches!(
            BrokerError::from(JwtError::Malformed("x".into())),
            BrokerError::Malformed
        ));
        assert!(matches!(
            BrokerError::from(JwtError::WeakSecret(3)),
            BrokerError::Config(_)
        ));
    }

    #[test]
    fn test_upstream_errors_are_invalid_credentials() {
        for err in [
            UpstreamError::Timeout(3),
            UpstreamError::Transport("connection refused".into()),
            UpstreamError::Protocol("bad authenticator".into()),
            UpstreamError::Refused("scope".into()),
        ] {
            let broker: BrokerError = err.into();
            assert!(matches!(broker, BrokerError::InvalidCredentials));
        }
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(BrokerError::DuplicateUser.kind(), "duplicate_user");
        assert_eq!(
            BrokerError::UnknownStrategy("ldap".into()).kind(),
            "unknown_strategy"
        );
        assert_eq!(BrokerError::InvalidCredentials.kind(), "invalid_credentials");
    }
}
