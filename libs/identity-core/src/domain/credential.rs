//! Password hashing for authentication identities.
//!
//! Argon2id with OWASP-recommended parameters (memory: 19 MiB,
//! iterations: 2, parallelism: 1) unless configured otherwise. An optional
//! pepper is prepended to the password before hashing and verifying.

use crate::CoreError;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};

#[derive(Clone)]
pub struct CredentialHasher {
    params: argon2::Params,
    pepper: Option<String>,
}

impl std::fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHasher")
            .field("params", &self.params)
            .field("pepper", &self.pepper.as_ref().map(|_| "set"))
            .finish()
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            params: argon2::Params::default(),
            pepper: None,
        }
    }
}

impl CredentialHasher {
    pub fn new(pepper: Option<String>) -> Result<Self, CoreError> {
        // OWASP ASVS recommended: m=19456 (19 MiB), t=2, p=1
        Self::with_params(19456, 2, 1, pepper)
    }

    pub fn with_params(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
        pepper: Option<String>,
    ) -> Result<Self, CoreError> {
        let params = argon2::Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| CoreError::Configuration(format!("argon2 params error: {e}")))?;
        Ok(Self { params, pepper })
    }

    /// Cheap parameters for tests.
    pub fn fast() -> Self {
        Self {
            params: argon2::Params::new(256, 1, 1, None).unwrap_or_default(),
            pepper: None,
        }
    }

    fn peppered(&self, password: &str) -> Vec<u8> {
        match &self.pepper {
            Some(p) => format!("{p}{password}").into_bytes(),
            None => password.as_bytes().to_vec(),
        }
    }

    pub fn hash(&self, password: &str) -> Result<String, CoreError> {
        let argon2 = Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            self.params.clone(),
        );
        let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
        let hash = argon2
            .hash_password(&self.peppered(password), &salt)
            .map_err(|e| CoreError::Internal(format!("password hash error: {e}")))?;
        Ok(hash.to_string())
    }

    /// `Ok(false)` on a wrong password; `Err` only for a corrupt hash.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, CoreError> {
        let parsed_hash = argon2::PasswordHash::new(hash)
            .map_err(|e| CoreError::Internal(format!("invalid hash format: {e}")))?;

        match Argon2::default().verify_password(&self.peppered(password), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CoreError::Internal(format!("password verify error: {e}"))),
        }
    }
}
