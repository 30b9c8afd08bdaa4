//! Credential hashing with Argon2id.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::error::AuthError;

/// One-way hasher for passwords and stored bearer-token digests.
///
/// Defaults to the OWASP-recommended Argon2id parameters
/// (m=19456 KiB, t=2, p=1).
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher {
    #[must_use]
    pub fn new() -> Self {
        // Constant parameters, valid by construction.
        let params =
            Params::new(19456, 2, 1, None).expect("OWASP argon2 parameters are valid constants");
        Self { params }
    }

    /// Build a hasher with custom cost parameters (tests use cheaper ones).
    ///
    /// # Errors
    ///
    /// [`AuthError::HashingFailure`] if the parameters are out of range.
    pub fn with_params(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    ) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|err| AuthError::HashingFailure(format!("invalid argon2 parameters: {err}")))?;
        Ok(Self { params })
    }

    /// Hash a plaintext with a fresh random salt, returning a PHC string.
    ///
    /// # Errors
    ///
    /// [`AuthError::HashingFailure`] on internal failure only.
    pub fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let hash = argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|err| AuthError::HashingFailure(format!("argon2 hashing failed: {err}")))?;
        Ok(hash.to_string())
    }

    /// Constant-time verification of `plaintext` against a PHC hash.
    ///
    /// Fails closed: a malformed hash or any internal error is "no match",
    /// never a distinct error the caller could observe.
    #[must_use]
    pub fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        argon2.verify_password(plaintext.as_bytes(), &parsed).is_ok()
    }
}

/// Run a hash on the blocking pool; the adaptive cost is deliberately
/// expensive and must stay off the async workers.
pub(crate) async fn hash_blocking(
    hasher: &PasswordHasher,
    plaintext: String,
) -> Result<String, AuthError> {
    let hasher = hasher.clone();
    tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
        .await
        .map_err(|err| AuthError::HashingFailure(format!("hashing task failed: {err}")))?
}

/// Run a verification on the blocking pool.
pub(crate) async fn verify_blocking(
    hasher: &PasswordHasher,
    plaintext: String,
    hash: String,
) -> Result<bool, AuthError> {
    let hasher = hasher.clone();
    tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &hash))
        .await
        .map_err(|err| AuthError::HashingFailure(format!("hashing task failed: {err}")))
}
