/// Password hashing and verification using Argon2id
use crate::error::{BrokerError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

/// Plaintext hashed once at startup so unknown users cost the same as known ones
const TIMING_DECOY: &str = "timing-decoy-password";

/// Argon2id cost factors
///
/// These decide how long a verification takes. Production values should keep
/// a single verification in the tens of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Salted, memory-hard one-way hasher
///
/// Hashes are PHC strings carrying their own parameters and salt, so a hash
/// produced under older cost factors still verifies after the configuration
/// changes.
#[derive(Clone)]
pub struct SecretHasher {
    params: Params,
    decoy_hash: String,
}

impl SecretHasher {
    pub fn new(cost: HashCost) -> Result<Self> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| BrokerError::Config(format!("Invalid Argon2 parameters: {}", e)))?;

        let mut hasher = Self {
            params,
            decoy_hash: String::new(),
        };
        hasher.decoy_hash = hasher.hash(TIMING_DECOY)?;
        Ok(hasher)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password with a fresh random 16-byte salt
    ///
    /// ## Returns
    ///
    /// PHC-formatted hash string safe for storage
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| BrokerError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();

        Ok(password_hash)
    }

    /// Verify a password against a stored hash
    ///
    /// The digest comparison is constant-time; total work depends only on
    /// the cost parameters encoded in `password_hash`.
    pub fn verify(&self, password: &str, password_hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(password_hash).map_err(|e| {
            BrokerError::StorageFault(format!("Stored password hash is unreadable: {}", e))
        })?;

        match self.argon2().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(BrokerError::Internal(format!(
                "Password verification failed: {}",
                e
            ))),
        }
    }

    /// Spend one verification's worth of work without a real account
    ///
    /// Always returns `false`.
    pub fn verify_decoy(&self, password: &str) -> bool {
        // Even a matching guess must not authenticate a missing account
        let _ = self.verify(password, &self.decoy_hash);
        false
    }
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher")
            .field("m_cost", &self.params.m_cost())
            .field("t_cost", &self.params.t_cost())
            .field("p_cost", &self.params.p_cost())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> SecretHasher {
        SecretHasher::new(HashCost {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        })
        .expect("valid test parameters")
    }

    #[test]
    fn test_hash_and_verify_valid_password() {
        let hasher = cheap();
        let hash = hasher.hash("s3cret").expect("should hash password successfully");
        assert!(hasher.verify("s3cret", &hash).expect("should verify successfully"));
    }

    #[test]
    fn test_verify_wrong_password() {
        let hasher = cheap();
        let hash = hasher.hash("s3cret").unwrap();
        assert!(!hasher.verify("wrong", &hash).expect("verification should succeed"));
    }

    #[test]
    fn test_hash_is_self_describing() {
        let hash = cheap().hash("s3cret").unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=256,t=1,p=1$"));
    }

    #[test]
    fn test_hash_verifies_under_different_configuration() {
        let old = cheap().hash("s3cret").unwrap();
        let newer = SecretHasher::new(HashCost {
            memory_kib: 512,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        assert!(newer.verify("s3cret", &old).unwrap());
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let hasher = cheap();
        let hash1 = hasher.hash("s3cret").unwrap();
        let hash2 = hasher.hash("s3cret").unwrap();
        // Different salts should produce different hashes
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_corrupt_hash_is_storage_fault() {
        let result = cheap().verify("s3cret", "not-a-phc-string");
        assert!(matches!(result, Err(BrokerError::StorageFault(_))));
    }

    #[test]
    fn test_decoy_never_matches() {
        let hasher = cheap();
        assert!(!hasher.verify_decoy(TIMING_DECOY));
        assert!(!hasher.verify_decoy("anything"));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let result = SecretHasher::new(HashCost {
            memory_kib: 1,
            iterations: 1,
            parallelism: 1,
        });
        assert!(matches!(result, Err(BrokerError::Config(_))));
    }
}
