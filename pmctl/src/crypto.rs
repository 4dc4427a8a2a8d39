//! Stateless credential primitives.
//!
//! - [`SecretCipher`]: AES-256-GCM encryption of short secrets at rest (refresh tokens, cluster
//!   signing keys), keyed by the SHA-256 digest of the configured `encryption_key`.
//! - Opaque tokens: [`generate_token`], [`hash_value`], [`verify_hash`] and the console API token
//!   format produced by [`generate_api_token`].
//! - PKCE (RFC 7636, `S256` only): [`PkceChallenge::generate`] and [`verify_pkce`].
//! - [`mask_sensitive`] for logging secrets without revealing them.
//!
//! None of these perform I/O. Every comparison of secret material goes through
//! [`constant_time_eq`].

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Literal prefix carried by every console API token, distinguishing it from signed tokens.
pub const API_TOKEN_PREFIX: &str = "pc_";

/// Number of leading characters of an API token that are safe to display.
pub const API_TOKEN_DISPLAY_LEN: usize = 8;

const NONCE_LEN: usize = 12;
const PKCE_VERIFIER_MIN: usize = 43;
const PKCE_VERIFIER_MAX: usize = 128;
/// The only challenge method issued or accepted.
pub const PKCE_METHOD: &str = "S256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("failed to decrypt value")]
    Decryption,
    #[error("failed to encrypt value")]
    Encryption,
}

/// Symmetric cipher for secrets persisted in the database.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Derive the 256-bit key from an arbitrary-length master secret.
    pub fn new(master_secret: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(master_secret.as_bytes()).into();
        Self { key }
    }

    /// Encrypt `plaintext`, returning base64url(nonce || ciphertext). The empty string maps to itself.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::Encryption)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encryption)?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(out))
    }

    /// Decrypt a value produced by [`SecretCipher::encrypt`]. The empty string maps to itself.
    pub fn decrypt(&self, encrypted: &str) -> Result<String, CryptoError> {
        if encrypted.is_empty() {
            return Ok(String::new());
        }

        let data = general_purpose::URL_SAFE_NO_PAD
            .decode(encrypted)
            .map_err(|_| CryptoError::Decryption)?;
        if data.len() <= NONCE_LEN {
            return Err(CryptoError::Decryption);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::Decryption)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)
    }
}

/// Generate `N` bytes of cryptographically secure randomness, base64url encoded without padding.
pub fn generate_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rng().fill(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Lowercase hex SHA-256 of `value`. This is how opaque credentials are persisted.
pub fn hash_value(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

/// Check `value` against a stored [`hash_value`] digest in constant time.
pub fn verify_hash(value: &str, hashed: &str) -> bool {
    constant_time_eq(hash_value(value).as_bytes(), hashed.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// A freshly minted console API token. `full` is shown to the user exactly once.
#[derive(Debug, Clone)]
pub struct GeneratedApiToken {
    pub full: String,
    pub hash: String,
    pub display_prefix: String,
}

/// Generate a console API token: `pc_` followed by 256 bits of randomness.
pub fn generate_api_token() -> GeneratedApiToken {
    let full = format!("{API_TOKEN_PREFIX}{}", generate_token::<32>());
    let hash = hash_value(&full);
    let display_prefix = full.chars().take(API_TOKEN_DISPLAY_LEN).collect();
    GeneratedApiToken {
        full,
        hash,
        display_prefix,
    }
}

/// Whether a presented credential has the shape of a console API token.
pub fn is_api_token(token: &str) -> bool {
    token.starts_with(API_TOKEN_PREFIX)
}

/// PKCE verifier/challenge pair for an authorization-code exchange.
#[derive(Debug, Clone, Serialize)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub method: &'static str,
}

impl PkceChallenge {
    /// New verifier from 64 random bytes (86 base64url characters) and its `S256` challenge.
    pub fn generate() -> Self {
        let verifier = generate_token::<64>();
        let challenge = pkce_challenge_for(&verifier);
        Self {
            verifier,
            challenge,
            method: PKCE_METHOD,
        }
    }
}

/// base64url-no-pad(SHA-256(verifier))
pub fn pkce_challenge_for(verifier: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Recompute the challenge for `verifier` and compare it with `challenge` in constant time.
pub fn verify_pkce(verifier: &str, challenge: &str) -> bool {
    if !(PKCE_VERIFIER_MIN..=PKCE_VERIFIER_MAX).contains(&verifier.len()) {
        return false;
    }
    constant_time_eq(pkce_challenge_for(verifier).as_bytes(), challenge.as_bytes())
}

/// Mask all but the last `visible_chars` characters, e.g. `"****abcd"`.
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    let len = value.chars().count();
    if len <= visible_chars {
        return "*".repeat(len);
    }
    let tail: String = value.chars().skip(len - visible_chars).collect();
    format!("{}{}", "*".repeat(len - visible_chars), tail)
}
