use {
    argon2::{
        Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
        password_hash::{self, SaltString},
    },
    rand::RngCore,
};

const SALT_LEN: usize = 16;

/// Failure inside the hashing primitive or an unparseable stored digest.
#[derive(Debug, thiserror::Error)]
#[error("password hashing failed: {0}")]
pub struct HashError(String);

impl From<password_hash::Error> for HashError {
    fn from(e: password_hash::Error) -> Self {
        Self(e.to_string())
    }
}

/// Argon2id password hashing with the crate's default work factor.
#[derive(Clone, Default)]
pub struct CredentialService {
    argon2: Argon2<'static>,
}

impl CredentialService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `secret` with a fresh random salt. Returns a PHC string.
    pub fn hash(&self, secret: &str) -> Result<String, HashError> {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt)?;
        let digest = self.argon2.hash_password(secret.as_bytes(), &salt)?;
        Ok(digest.to_string())
    }

    /// Check `secret` against a stored digest.
    ///
    /// The tag comparison inside argon2 is constant time, so a mismatch does
    /// not reveal how many bytes matched.
    pub fn verify(&self, digest: &str, secret: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(digest)?;
        match self.argon2.verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for CredentialService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialService").finish_non_exhaustive()
    }
}
