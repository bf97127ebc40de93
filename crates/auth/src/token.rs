use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    chacha20poly1305::{
        XChaCha20Poly1305, XNonce,
        aead::{Aead, KeyInit, Payload},
    },
    chrono::{DateTime, TimeDelta, Utc},
    rand::RngCore,
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    tracing::debug,
};

/// Version/purpose prefix. Also bound into the AEAD as associated data, so a
/// sealed body cannot be replayed under a different header.
const HEADER: &str = "v2.local.";
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Authenticated principal bound to a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub display_name: String,
}

/// Sealed token contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: i64,
    pub username: String,
    pub issued_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Malformed, tampered with, or sealed under another key.
    #[error("invalid token")]
    InvalidToken,
    /// Authentic but past its validity window.
    #[error("token expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
    #[error("failed to encode token: {0}")]
    Encoding(String),
}

/// Issues and verifies stateless session tokens.
pub struct TokenService {
    cipher: XChaCha20Poly1305,
    ttl: TimeDelta,
}

impl TokenService {
    /// Build from a configured secret. The AEAD key is the SHA-256 digest of
    /// the secret, so any secret length is accepted.
    pub fn new(secret: &str, ttl_hours: u32) -> Self {
        let key = Sha256::digest(secret.as_bytes());
        Self {
            cipher: XChaCha20Poly1305::new(&key),
            ttl: TimeDelta::hours(i64::from(ttl_hours)),
        }
    }

    /// A service keyed with fresh random bytes. Tokens it issues stop
    /// verifying once the process exits.
    pub fn ephemeral(ttl_hours: u32) -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        Self {
            cipher: XChaCha20Poly1305::new(&key.into()),
            ttl: TimeDelta::hours(i64::from(ttl_hours)),
        }
    }

    pub fn issue(&self, identity_id: i64, identity_name: &str) -> Result<String, TokenError> {
        self.issue_at(identity_id, identity_name, Utc::now())
    }

    pub fn issue_at(
        &self,
        identity_id: i64,
        identity_name: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let expire_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| TokenError::Encoding("token lifetime out of range".into()))?;
        let claims = TokenClaims {
            user_id: identity_id,
            username: identity_name.to_string(),
            issued_at: now,
            expire_at,
        };
        let plaintext =
            serde_json::to_vec(&claims).map_err(|e| TokenError::Encoding(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), Payload {
                msg: &plaintext,
                aad: HEADER.as_bytes(),
            })
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        let mut raw = Vec::with_capacity(NONCE_LEN + sealed.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&sealed);

        debug!(user_id = identity_id, expire_at = %claims.expire_at, "issued session token");
        Ok(format!("{HEADER}{}", URL_SAFE_NO_PAD.encode(raw)))
    }

    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Identity, TokenError> {
        let claims = self.open(token)?;
        if now >= claims.expire_at {
            return Err(TokenError::Expired {
                expired_at: claims.expire_at,
            });
        }
        Ok(Identity {
            id: claims.user_id,
            display_name: claims.username,
        })
    }

    /// Decrypt and authenticate without checking expiry.
    fn open(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let body = token
            .strip_prefix(HEADER)
            .ok_or(TokenError::InvalidToken)?;
        let raw = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| TokenError::InvalidToken)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(TokenError::InvalidToken);
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), Payload {
                msg: sealed,
                aad: HEADER.as_bytes(),
            })
            .map_err(|_| TokenError::InvalidToken)?;
        serde_json::from_slice(&plaintext).map_err(|_| TokenError::InvalidToken)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
