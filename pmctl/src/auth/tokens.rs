//! Signed token creation and verification.
//!
//! Two families of HS256 tokens are minted here:
//! - session tokens (access/refresh pairs) signed with the service's own `secret_key`, carrying a
//!   `type` claim so one kind is never accepted in place of the other;
//! - downstream cluster tokens signed with an environment's own signing key, carrying only the
//!   claims the messaging cluster's token authenticator understands.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::Config, crypto};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token is invalid")]
    Invalid,
    #[error("expected a {expected} token")]
    WrongType { expected: &'static str },
    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Claims of a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Claims of a downstream cluster token. No `type` claim: the cluster rejects unknown shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterClaims {
    pub sub: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Mints and verifies session tokens with the service signing secret.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("secret", &crypto::mask_sensitive(&self.secret, 4))
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

impl TokenIssuer {
    pub fn new(secret: impl Into<String>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, TokenError> {
        let secret = config
            .secret_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TokenError::Signing("secret_key is required".to_string()))?;
        Ok(Self::new(
            secret,
            config.auth.access_token_lifetime,
            config.auth.refresh_token_lifetime,
        ))
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Every access token carries a random `jti`, so two tokens minted for the same user in the
    /// same second still hash differently.
    pub fn create_access_token(&self, subject: &str, ttl: Option<Duration>) -> Result<String, TokenError> {
        let jti = crypto::generate_token::<16>();
        self.sign(subject, TokenType::Access, ttl.unwrap_or(self.access_ttl), Some(jti))
    }

    /// Returns the token and its random id, which is what the session store keeps for revocation.
    pub fn create_refresh_token(&self, subject: &str, ttl: Option<Duration>) -> Result<(String, String), TokenError> {
        let id = crypto::generate_token::<32>();
        let token = self.sign(subject, TokenType::Refresh, ttl.unwrap_or(self.refresh_ttl), Some(id.clone()))?;
        Ok((token, id))
    }

    pub fn decode_token(&self, token: &str) -> Result<Claims, TokenError> {
        let key = DecodingKey::from_secret(self.secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<Claims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(map_decode_error)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_typed(token, TokenType::Access)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_typed(token, TokenType::Refresh)
    }

    fn verify_typed(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let claims = self.decode_token(token)?;
        if claims.token_type != expected {
            return Err(TokenError::WrongType {
                expected: expected.as_str(),
            });
        }
        Ok(claims)
    }

    fn sign(&self, subject: &str, token_type: TokenType, ttl: Duration, jti: Option<String>) -> Result<String, TokenError> {
        let now = Utc::now();
        let exp = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| TokenError::Signing("token lifetime is out of range".to_string()))?;
        let claims = Claims {
            sub: subject.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            token_type,
            jti,
        };
        let key = EncodingKey::from_secret(self.secret.as_bytes());
        encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| TokenError::Signing(e.to_string()))
    }
}

/// Mint a token for the messaging cluster, signed with the environment's own secret.
///
/// `ttl_days = None` produces a token without `exp`, which the cluster treats as non-expiring.
pub fn create_cluster_token(subject: &str, secret: &str, ttl_days: Option<i64>) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::Signing("cluster signing key is empty".to_string()));
    }
    let now = Utc::now();
    let exp = match ttl_days {
        None => None,
        Some(days) => Some(
            offset_by_days(now, days)
                .ok_or_else(|| TokenError::Signing("token lifetime is out of range".to_string()))?
                .timestamp(),
        ),
    };
    let claims = ClusterClaims {
        sub: subject.to_string(),
        iat: now.timestamp(),
        exp,
    };
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| TokenError::Signing(e.to_string()))
}

/// `from` shifted by `days`, or `None` when the result is not representable.
pub fn offset_by_days(from: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_days(days).and_then(|delta| from.checked_add_signed(delta))
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,

        // Anything a caller can produce by sending garbage is just an invalid token
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::ImmatureSignature
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm => TokenError::Invalid,

        // Key problems are ours, not the caller's
        ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::RsaFailedSigning
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::MissingAlgorithm
        | ErrorKind::Crypto(_) => TokenError::Signing(e.to_string()),

        _ => TokenError::Invalid,
    }
}
