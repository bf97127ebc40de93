//! Credentials and session tokens.
//!
//! Passwords are stored as Argon2id PHC strings. Session tokens are
//! self-contained: the identity and validity window are sealed with
//! XChaCha20-Poly1305 under a static server key, so verification never
//! touches storage and a token cannot be revoked before it expires.

pub mod credentials;
pub mod token;

pub use {
    credentials::{CredentialService, HashError},
    token::{Identity, TokenClaims, TokenError, TokenService},
};
