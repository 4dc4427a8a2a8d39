//! Services for caller credentials.
//!
//! - [`ApiTokenService`]: opaque `pc_` console API tokens, plus the per-environment signing key
//!   used to mint tokens for the messaging cluster itself.
//! - [`SessionService`]: interactive sessions backed by a signed access/refresh pair, with
//!   single-use refresh rotation.
//! - [`OidcService`]: per-environment OpenID Connect providers and the PKCE-protected
//!   authorization-code login that ends in an ordinary session.
//! - [`maintenance`]: the background sweep that removes dead session rows.
//!
//! The services persist only hashes or ciphertext; plaintext credentials leave the service once,
//! in the response that created them.

use thiserror::Error;

use crate::{auth::tokens::TokenError, crypto::CryptoError, store::StoreError};

pub mod api_tokens;
pub mod maintenance;
pub mod oidc;
pub mod sessions;

pub use api_tokens::ApiTokenService;
pub use oidc::{AuthorizationRequest, OidcProviderSettings, OidcService};
pub use sessions::{SessionService, TokenPair};

#[derive(Debug, Error)]
pub enum CredentialError {
    /// Rejected input or precondition, e.g. "User is not active"
    #[error("{0}")]
    Validation(String),

    /// The presented credential is unknown, revoked, expired or malformed. Deliberately carries
    /// no detail.
    #[error("invalid credential")]
    InvalidCredential,

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The identity provider failed or answered with something unusable
    #[error("identity provider error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CredentialError>;
